/// Lifecycle of an owned name on the multicast link.
///
/// A name being claimed walks forward through three probe states and two
/// announce states before it is established; a conflict sends it back to
/// the start. Cancellation is terminal.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsState {
    #[default]
    Probing1,
    Probing2,
    Probing3,
    Announcing1,
    Announcing2,
    Announced,
    Canceled,
}

impl DnsState {
    /// Move one step forward; `Announced` is sticky until canceled.
    pub(crate) fn advance(self) -> DnsState {
        match self {
            DnsState::Probing1 => DnsState::Probing2,
            DnsState::Probing2 => DnsState::Probing3,
            DnsState::Probing3 => DnsState::Announcing1,
            DnsState::Announcing1 => DnsState::Announcing2,
            DnsState::Announcing2 | DnsState::Announced => DnsState::Announced,
            DnsState::Canceled => DnsState::Canceled,
        }
    }

    /// Fall back to the start of probing; canceled names stay canceled.
    pub(crate) fn revert(self) -> DnsState {
        match self {
            DnsState::Canceled => DnsState::Canceled,
            _ => DnsState::Probing1,
        }
    }

    pub fn is_probing(self) -> bool {
        matches!(
            self,
            DnsState::Probing1 | DnsState::Probing2 | DnsState::Probing3
        )
    }

    pub fn is_announcing(self) -> bool {
        matches!(self, DnsState::Announcing1 | DnsState::Announcing2)
    }

    pub fn is_announced(self) -> bool {
        self == DnsState::Announced
    }

    pub fn is_canceled(self) -> bool {
        self == DnsState::Canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_walks_the_full_lifecycle() {
        let mut state = DnsState::default();
        let expected = [
            DnsState::Probing2,
            DnsState::Probing3,
            DnsState::Announcing1,
            DnsState::Announcing2,
            DnsState::Announced,
        ];
        for want in expected {
            state = state.advance();
            assert_eq!(state, want);
        }
        // Announced is sticky.
        assert_eq!(state.advance(), DnsState::Announced);
    }

    #[test]
    fn test_revert_restarts_probing() {
        assert_eq!(DnsState::Announced.revert(), DnsState::Probing1);
        assert_eq!(DnsState::Announcing2.revert(), DnsState::Probing1);
        assert_eq!(DnsState::Probing3.revert(), DnsState::Probing1);
    }

    #[test]
    fn test_canceled_is_terminal() {
        assert_eq!(DnsState::Canceled.advance(), DnsState::Canceled);
        assert_eq!(DnsState::Canceled.revert(), DnsState::Canceled);
        assert!(DnsState::Canceled.is_canceled());
    }

    #[test]
    fn test_predicates() {
        assert!(DnsState::Probing2.is_probing());
        assert!(DnsState::Announcing1.is_announcing());
        assert!(DnsState::Announced.is_announced());
        assert!(!DnsState::Announced.is_probing());
    }
}
