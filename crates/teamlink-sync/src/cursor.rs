use teamlink_types::models::ChatSeq;

/// Loaded range of a room's history. Only history fetches move it, and its
/// coverage never shrinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageCursor {
    pub min_seq: Option<ChatSeq>,
    pub max_seq: Option<ChatSeq>,
    pub has_older: bool,
}

impl PageCursor {
    /// Fold in a successful page: take its older-history flag and widen the
    /// range to the page's `(min, max)` bounds. Bounds reaching into
    /// placeholder ids are ignored.
    pub fn absorb(&mut self, has_older: bool, bounds: Option<(ChatSeq, ChatSeq)>) {
        self.has_older = has_older;

        let Some((lo, hi)) = bounds.filter(|(lo, _)| *lo > 0) else {
            return;
        };
        self.min_seq = Some(self.min_seq.map_or(lo, |m| m.min(lo)));
        self.max_seq = Some(self.max_seq.map_or(hi, |m| m.max(hi)));
    }

    /// Whether a "load older" request makes sense right now.
    pub fn can_load_older(&self) -> bool {
        self.has_older && self.min_seq.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_sets_bounds() {
        let mut cursor = PageCursor::default();
        cursor.absorb(true, Some((100, 120)));
        assert_eq!(cursor.min_seq, Some(100));
        assert_eq!(cursor.max_seq, Some(120));
        assert!(cursor.can_load_older());
    }

    #[test]
    fn page_without_bounds_does_not_move_the_range() {
        let mut cursor = PageCursor::default();
        cursor.absorb(true, Some((100, 120)));
        cursor.absorb(false, None);
        assert_eq!(cursor.min_seq, Some(100));
        assert_eq!(cursor.max_seq, Some(120));
        assert!(!cursor.has_older);
        assert!(!cursor.can_load_older());
    }

    #[test]
    fn coverage_never_shrinks() {
        let mut cursor = PageCursor::default();
        cursor.absorb(true, Some((100, 120)));
        cursor.absorb(true, Some((80, 99)));
        cursor.absorb(true, Some((110, 110)));
        assert_eq!(cursor.min_seq, Some(80));
        assert_eq!(cursor.max_seq, Some(120));
    }

    #[test]
    fn placeholder_ids_are_ignored() {
        let mut cursor = PageCursor::default();
        cursor.absorb(false, Some((-1_700_000_000_000, -1_700_000_000_000)));
        assert_eq!(cursor.min_seq, None);
        cursor.absorb(false, Some((-5, 7)));
        assert_eq!(cursor.min_seq, None);
        cursor.absorb(false, Some((3, 7)));
        assert_eq!(cursor.min_seq, Some(3));
        assert_eq!(cursor.max_seq, Some(7));
    }
}
