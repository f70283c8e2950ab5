//! Derived per-message views: reactions grouped by code, and which
//! participants have read a message. Recomputed on every call.

use std::collections::HashSet;

use teamlink_types::models::{MemberSeq, Reaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionSummary {
    pub code: String,
    pub member_seqs: Vec<MemberSeq>,
    pub count: usize,
    pub has_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadPartition {
    pub read: Vec<MemberSeq>,
    pub unread: Vec<MemberSeq>,
}

/// Group reactions by code, in order of each code's first appearance. A
/// member reacting twice with the same code counts once.
pub fn group_reactions(reactions: &[Reaction], me: MemberSeq) -> Vec<ReactionSummary> {
    let mut groups: Vec<ReactionSummary> = Vec::new();
    for reaction in reactions {
        let idx = match groups.iter().position(|g| g.code == reaction.code) {
            Some(idx) => idx,
            None => {
                groups.push(ReactionSummary {
                    code: reaction.code.clone(),
                    member_seqs: Vec::new(),
                    count: 0,
                    has_me: false,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[idx];
        if group.member_seqs.contains(&reaction.member_seq) {
            continue;
        }
        group.member_seqs.push(reaction.member_seq);
        group.count += 1;
        group.has_me |= reaction.member_seq == me;
    }
    groups
}

/// Split participants into those in `read_by` and the rest. Both halves keep
/// participant order; readers who are not participants are ignored.
pub fn partition_readers(read_by: &[MemberSeq], participants: &[MemberSeq]) -> ReadPartition {
    let readers: HashSet<MemberSeq> = read_by.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut partition = ReadPartition::default();
    for &member in participants {
        if !seen.insert(member) {
            continue;
        }
        if readers.contains(&member) {
            partition.read.push(member);
        } else {
            partition.unread.push(member);
        }
    }
    partition
}
