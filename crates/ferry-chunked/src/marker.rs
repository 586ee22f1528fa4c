/// Tag persisted with every chunk row.
///
/// Readers never look at it; reassembly relies on `sequence_index` alone.
/// The integer codes are kept as stored by existing tables:
///
/// | code | variant  | written for                                      |
/// |------|----------|--------------------------------------------------|
/// | `0`  | `Single` | the closing chunk (sequence 0 or later)          |
/// | `-1` | `First`  | sequence 0 flushed before close                  |
/// | `-2` | `End`    | any later chunk flushed before close             |
///
/// Interior chunks and a trailing chunk that happened to be flushed early
/// both get `End`, so the tag cannot be used to find an object's last row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    Single,
    First,
    End,
}

impl Marker {
    /// Marker for the chunk at `sequence`; `last` is true for the flush done by close.
    pub fn for_chunk(sequence: i64, last: bool) -> Self {
        match (sequence, last) {
            (_, true) => Marker::Single,
            (0, false) => Marker::First,
            (_, false) => Marker::End,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Marker::Single => 0,
            Marker::First => -1,
            Marker::End => -2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_rules() {
        assert_eq!(Marker::for_chunk(0, true), Marker::Single);
        assert_eq!(Marker::for_chunk(0, false), Marker::First);
        assert_eq!(Marker::for_chunk(3, false), Marker::End);
        assert_eq!(Marker::for_chunk(3, true), Marker::Single);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Marker::Single.code(), 0);
        assert_eq!(Marker::First.code(), -1);
        assert_eq!(Marker::End.code(), -2);
    }
}
