//! Typed accessors over the key layout in [`crate::keys`]

use bitcode::{DecodeOwned, Encode};

use tessera_core::{store, GroupId, KvStore, MemberId, Point, SigningId};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::keys;
use crate::types::{
    ComplaintsWithStatus, Confirm, Group, Member, PartialSignature, Round1Info, Round2Info,
    Signing, SigningAttempt, SigningExpiration,
};

impl<S: KvStore> Coordinator<S> {
    pub(crate) fn read<T: DecodeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.store.get(key) {
            Some(bytes) => Ok(Some(store::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn write<T: Encode + ?Sized>(&mut self, key: Vec<u8>, value: &T) {
        self.store.set(key, store::encode(value));
    }

    fn read_all<T: DecodeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.store
            .scan_prefix(prefix)
            .into_iter()
            .map(|(_, v)| store::decode(&v).map_err(TssError::from))
            .collect()
    }

    fn delete_prefix(&mut self, prefix: &[u8]) {
        for (key, _) in self.store.scan_prefix(prefix) {
            self.store.delete(&key);
        }
    }

    fn read_u64(&self, key: &[u8]) -> Result<u64> {
        Ok(self.read::<u64>(key)?.unwrap_or(0))
    }

    // ===== groups =====

    pub fn group_count(&self) -> Result<u64> {
        self.read_u64(&keys::group_count())
    }

    pub(crate) fn set_group_count(&mut self, count: u64) {
        self.write(keys::group_count(), &count);
    }

    pub fn get_group(&self, group_id: GroupId) -> Result<Group> {
        self.read(&keys::group(group_id))?
            .ok_or(TssError::GroupNotFound(group_id))
    }

    pub(crate) fn set_group(&mut self, group: &Group) {
        self.write(keys::group(group.id), group);
    }

    /// Every group in id order; undecodable records are skipped
    pub fn get_groups(&self) -> Vec<Group> {
        self.store
            .scan_prefix(&[keys::GROUP_PREFIX])
            .into_iter()
            .filter_map(|(_, v)| store::decode(&v).ok())
            .collect()
    }

    pub fn get_member(&self, group_id: GroupId, member_id: MemberId) -> Result<Member> {
        self.read(&keys::member(group_id, member_id))?
            .ok_or(TssError::MemberNotFound { group_id, member_id })
    }

    pub(crate) fn set_member(&mut self, member: &Member) {
        self.write(keys::member(member.group_id, member.id), member);
    }

    pub fn get_members(&self, group_id: GroupId) -> Result<Vec<Member>> {
        self.read_all(&keys::members_of(group_id))
    }

    /// The member slot `member_id` after checking `sender` owns it
    pub(crate) fn get_authorized_member(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        sender: &str,
    ) -> Result<Member> {
        let member = self.get_member(group_id, member_id)?;
        if member.address != sender {
            return Err(TssError::MemberNotAuthorized(format!(
                "{} is not member {} of group {}",
                sender, member_id, group_id
            )));
        }
        Ok(member)
    }

    pub fn get_dkg_context(&self, group_id: GroupId) -> Result<Vec<u8>> {
        self.read(&keys::dkg_context(group_id))?
            .ok_or_else(|| TssError::Corrupted(format!("missing dkg context of group {}", group_id)))
    }

    pub(crate) fn set_dkg_context(&mut self, group_id: GroupId, context: &Vec<u8>) {
        self.write(keys::dkg_context(group_id), context);
    }

    // ===== round 1 =====

    pub fn get_round1_info(&self, group_id: GroupId, member_id: MemberId) -> Result<Option<Round1Info>> {
        self.read(&keys::round1_info(group_id, member_id))
    }

    pub(crate) fn set_round1_info(&mut self, group_id: GroupId, info: &Round1Info) {
        self.write(keys::round1_info(group_id, info.member_id), info);
    }

    pub fn get_round1_infos(&self, group_id: GroupId) -> Result<Vec<Round1Info>> {
        self.read_all(&keys::round1_infos_of(group_id))
    }

    pub fn round1_count(&self, group_id: GroupId) -> Result<u64> {
        self.read_u64(&keys::round1_count(group_id))
    }

    pub(crate) fn set_round1_count(&mut self, group_id: GroupId, count: u64) {
        self.write(keys::round1_count(group_id), &count);
    }

    pub(crate) fn get_accumulated_commit(&self, group_id: GroupId, index: u64) -> Result<Option<Point>> {
        self.read(&keys::accumulated_commit(group_id, index))
    }

    pub(crate) fn set_accumulated_commit(&mut self, group_id: GroupId, index: u64, commit: &Point) {
        self.write(keys::accumulated_commit(group_id, index), commit);
    }

    /// Accumulated commits in index order
    pub fn get_accumulated_commits(&self, group_id: GroupId) -> Result<Vec<Point>> {
        self.read_all(&keys::accumulated_commits_of(group_id))
    }

    // ===== round 2 =====

    pub fn get_round2_info(&self, group_id: GroupId, member_id: MemberId) -> Result<Option<Round2Info>> {
        self.read(&keys::round2_info(group_id, member_id))
    }

    pub(crate) fn set_round2_info(&mut self, group_id: GroupId, info: &Round2Info) {
        self.write(keys::round2_info(group_id, info.member_id), info);
    }

    pub fn get_round2_infos(&self, group_id: GroupId) -> Result<Vec<Round2Info>> {
        self.read_all(&keys::round2_infos_of(group_id))
    }

    pub fn round2_count(&self, group_id: GroupId) -> Result<u64> {
        self.read_u64(&keys::round2_count(group_id))
    }

    pub(crate) fn set_round2_count(&mut self, group_id: GroupId, count: u64) {
        self.write(keys::round2_count(group_id), &count);
    }

    // ===== round 3 =====

    pub fn get_complaints_with_status(
        &self,
        group_id: GroupId,
        member_id: MemberId,
    ) -> Result<Option<ComplaintsWithStatus>> {
        self.read(&keys::complaints(group_id, member_id))
    }

    pub(crate) fn set_complaints_with_status(&mut self, group_id: GroupId, complaints: &ComplaintsWithStatus) {
        self.write(keys::complaints(group_id, complaints.member_id), complaints);
    }

    pub fn get_all_complaints_with_status(&self, group_id: GroupId) -> Result<Vec<ComplaintsWithStatus>> {
        self.read_all(&keys::complaints_of(group_id))
    }

    pub fn get_confirm(&self, group_id: GroupId, member_id: MemberId) -> Result<Option<Confirm>> {
        self.read(&keys::confirm(group_id, member_id))
    }

    pub(crate) fn set_confirm(&mut self, group_id: GroupId, confirm: &Confirm) {
        self.write(keys::confirm(group_id, confirm.member_id), confirm);
    }

    pub fn get_confirms(&self, group_id: GroupId) -> Result<Vec<Confirm>> {
        self.read_all(&keys::confirms_of(group_id))
    }

    pub fn confirm_complain_count(&self, group_id: GroupId) -> Result<u64> {
        self.read_u64(&keys::confirm_complain_count(group_id))
    }

    pub(crate) fn set_confirm_complain_count(&mut self, group_id: GroupId, count: u64) {
        self.write(keys::confirm_complain_count(group_id), &count);
    }

    // ===== end-block bookkeeping =====

    pub fn pending_process_groups(&self) -> Result<Vec<GroupId>> {
        Ok(self.read(&keys::pending_process_groups())?.unwrap_or_default())
    }

    pub(crate) fn set_pending_process_groups(&mut self, group_ids: &Vec<GroupId>) {
        self.write(keys::pending_process_groups(), group_ids);
    }

    pub(crate) fn add_pending_process_group(&mut self, group_id: GroupId) -> Result<()> {
        let mut pending = self.pending_process_groups()?;
        pending.push(group_id);
        self.set_pending_process_groups(&pending);
        Ok(())
    }

    pub fn last_expired_group_id(&self) -> Result<GroupId> {
        self.read_u64(&keys::last_expired_group_id())
    }

    pub(crate) fn set_last_expired_group_id(&mut self, group_id: GroupId) {
        self.write(keys::last_expired_group_id(), &group_id);
    }

    /// Drop context, round records, complaints, confirms and counters
    pub(crate) fn delete_interim_dkg_data(&mut self, group_id: GroupId) {
        self.store.delete(&keys::dkg_context(group_id));
        self.delete_prefix(&keys::round1_infos_of(group_id));
        self.store.delete(&keys::round1_count(group_id));
        self.delete_prefix(&keys::accumulated_commits_of(group_id));
        self.delete_prefix(&keys::round2_infos_of(group_id));
        self.store.delete(&keys::round2_count(group_id));
        self.delete_prefix(&keys::complaints_of(group_id));
        self.delete_prefix(&keys::confirms_of(group_id));
        self.store.delete(&keys::confirm_complain_count(group_id));
    }

    // ===== signings =====

    pub fn signing_count(&self) -> Result<u64> {
        self.read_u64(&keys::signing_count())
    }

    pub(crate) fn set_signing_count(&mut self, count: u64) {
        self.write(keys::signing_count(), &count);
    }

    pub fn get_signing(&self, signing_id: SigningId) -> Result<Signing> {
        self.read(&keys::signing(signing_id))?
            .ok_or(TssError::SigningNotFound(signing_id))
    }

    pub(crate) fn set_signing(&mut self, signing: &Signing) {
        self.write(keys::signing(signing.id), signing);
    }

    pub fn get_signing_attempt(&self, signing_id: SigningId, attempt: u64) -> Result<SigningAttempt> {
        self.read(&keys::signing_attempt(signing_id, attempt))?
            .ok_or(TssError::SigningAttemptNotFound { signing_id, attempt })
    }

    pub(crate) fn set_signing_attempt(&mut self, attempt: &SigningAttempt) {
        self.write(keys::signing_attempt(attempt.signing_id, attempt.attempt), attempt);
    }

    pub fn get_partial_signature(
        &self,
        signing_id: SigningId,
        attempt: u64,
        member_id: MemberId,
    ) -> Result<Option<PartialSignature>> {
        self.read(&keys::partial_sig(signing_id, attempt, member_id))
    }

    pub(crate) fn set_partial_signature(&mut self, partial: &PartialSignature) {
        self.write(
            keys::partial_sig(partial.signing_id, partial.attempt, partial.member_id),
            partial,
        );
    }

    /// Partial signatures of one attempt in member id order
    pub fn get_partial_signatures(&self, signing_id: SigningId, attempt: u64) -> Result<Vec<PartialSignature>> {
        self.read_all(&keys::partial_sigs_of(signing_id, attempt))
    }

    pub fn partial_signature_count(&self, signing_id: SigningId, attempt: u64) -> Result<u64> {
        self.read_u64(&keys::partial_sig_count(signing_id, attempt))
    }

    pub(crate) fn set_partial_signature_count(&mut self, signing_id: SigningId, attempt: u64, count: u64) {
        self.write(keys::partial_sig_count(signing_id, attempt), &count);
    }

    /// Attempt record, partial signatures and their counter
    pub(crate) fn delete_interim_signing_data(&mut self, signing_id: SigningId, attempt: u64) {
        self.delete_prefix(&keys::partial_sigs_of(signing_id, attempt));
        self.store.delete(&keys::partial_sig_count(signing_id, attempt));
        self.store.delete(&keys::signing_attempt(signing_id, attempt));
    }

    pub fn pending_process_signings(&self) -> Result<Vec<SigningId>> {
        Ok(self.read(&keys::pending_process_signings())?.unwrap_or_default())
    }

    pub(crate) fn set_pending_process_signings(&mut self, signing_ids: &Vec<SigningId>) {
        self.write(keys::pending_process_signings(), signing_ids);
    }

    pub fn signing_expirations(&self) -> Result<Vec<SigningExpiration>> {
        Ok(self.read(&keys::signing_expirations())?.unwrap_or_default())
    }

    pub(crate) fn set_signing_expirations(&mut self, expirations: &Vec<SigningExpiration>) {
        self.write(keys::signing_expirations(), expirations);
    }
}
