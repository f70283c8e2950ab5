use std::collections::BTreeMap;

use teamlink_types::models::{ChatMessage, ChatSeq, MemberSeq, Reaction};

/// Ordered, duplicate-free message set of one room, keyed by sequence id.
///
/// Iteration is newest first. Local placeholders carry negative ids, so they
/// sort after every server message.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: BTreeMap<ChatSeq, ChatMessage>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, seq: ChatSeq) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn get(&self, seq: ChatSeq) -> Option<&ChatMessage> {
        self.entries.get(&seq)
    }

    /// Insert unless the id is already present. Returns whether it was added.
    pub fn insert(&mut self, message: ChatMessage) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.entry(message.chat_seq) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(message);
                true
            }
        }
    }

    /// Union a batch into the set. Returns the ids that were new.
    pub fn merge_batch<I>(&mut self, batch: I) -> Vec<ChatSeq>
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        batch
            .into_iter()
            .filter_map(|m| {
                let seq = m.chat_seq;
                self.insert(m).then_some(seq)
            })
            .collect()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.values().rev()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.iter().cloned().collect()
    }

    pub fn seqs(&self) -> Vec<ChatSeq> {
        self.entries.keys().rev().copied().collect()
    }

    /// Highest server-assigned id.
    pub fn newest_seq(&self) -> Option<ChatSeq> {
        self.entries.keys().next_back().copied().filter(|s| *s > 0)
    }

    /// `member` has read everything up to and including `up_to`. Returns the
    /// number of messages that changed.
    pub fn apply_read(&mut self, member: MemberSeq, up_to: ChatSeq) -> usize {
        let mut changed = 0;
        for message in self.entries.range_mut(..=up_to).map(|(_, m)| m) {
            if !message.read_by.contains(&member) {
                message.read_by.push(member);
                changed += 1;
            }
        }
        changed
    }

    pub fn replace_reactions(&mut self, seq: ChatSeq, reactions: Vec<Reaction>) -> bool {
        match self.entries.get_mut(&seq) {
            Some(message) => {
                message.reactions = reactions;
                true
            }
            None => false,
        }
    }

    pub fn mark_deleted(&mut self, seq: ChatSeq) -> bool {
        match self.entries.get_mut(&seq) {
            Some(message) if !message.deleted => {
                message.deleted = true;
                true
            }
            _ => false,
        }
    }

    /// Placeholders still waiting for an echo, newest first.
    pub fn optimistic(&self) -> Vec<&ChatMessage> {
        self.entries.range(..0).rev().map(|(_, m)| m).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
