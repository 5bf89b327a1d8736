//! Reward values and reward selection

use std::fmt;

use log::warn;

/// A reward granted for a completed video.
///
/// Two rewards are equal when both label and amount match. `Failure` stands
/// for "no reward" as well as a network-reported failure to reward.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Reward {
    Success {
        label: String,
        amount: u32,
    },
    #[default]
    Failure,
}

impl Reward {
    pub fn success(label: impl Into<String>, amount: u32) -> Self {
        Reward::Success {
            label: label.into(),
            amount,
        }
    }

    pub fn failure() -> Self {
        Reward::Failure
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reward::Success { .. })
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Reward::Success { label, .. } => Some(label),
            Reward::Failure => None,
        }
    }

    pub fn amount(&self) -> Option<u32> {
        match self {
            Reward::Success { amount, .. } => Some(*amount),
            Reward::Failure => None,
        }
    }

    /// Builds a reward from the label/amount strings carried by an ad response.
    ///
    /// Both values must be present and the amount must parse as a non-negative
    /// integer, otherwise the placement has no reward.
    pub fn from_response(label: Option<&str>, amount: Option<&str>) -> Self {
        match (label, amount) {
            (Some(label), Some(amount)) if !label.is_empty() => match amount.trim().parse() {
                Ok(amount) => Reward::success(label, amount),
                Err(e) => {
                    warn!("Unable to parse reward amount '{amount}' for '{label}': {e}");
                    Reward::Failure
                }
            },
            _ => Reward::Failure,
        }
    }
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reward::Success { label, amount } => write!(f, "{amount} {label}"),
            Reward::Failure => write!(f, "no reward"),
        }
    }
}

/// Chooses between the locally configured reward and the one reported by the
/// ad network. A successful local reward always wins; otherwise the network
/// value is returned as is, including its failure.
pub fn choose(local: &Reward, network: &Reward) -> Reward {
    if local.is_success() {
        local.clone()
    } else {
        network.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL_REWARD: &str = "local_reward";

    #[test]
    fn test_choose_prefers_local_success() {
        let local = Reward::success(LOCAL_REWARD, 123);
        let network = Reward::success("network_reward", 456);
        assert_eq!(choose(&local, &network), local);
    }

    #[test]
    fn test_choose_prefers_local_over_network_failure() {
        let local = Reward::success(LOCAL_REWARD, 123);
        assert_eq!(choose(&local, &Reward::failure()), local);
    }

    #[test]
    fn test_choose_falls_back_to_network() {
        let network = Reward::success("network_reward", 456);
        assert_eq!(choose(&Reward::failure(), &network), network);
        assert_eq!(choose(&Reward::failure(), &Reward::failure()), Reward::Failure);
    }

    #[test]
    fn test_from_response() {
        assert_eq!(
            Reward::from_response(Some("currency_name"), Some("123")),
            Reward::success("currency_name", 123)
        );
        assert_eq!(Reward::from_response(Some("coins"), Some("-5")), Reward::Failure);
        assert_eq!(Reward::from_response(Some("coins"), Some("lots")), Reward::Failure);
        assert_eq!(Reward::from_response(None, Some("5")), Reward::Failure);
        assert_eq!(Reward::from_response(Some(""), Some("5")), Reward::Failure);
    }

    #[test]
    fn test_equality_by_label_and_amount() {
        assert_eq!(Reward::success("coins", 5), Reward::success("coins", 5));
        assert_ne!(Reward::success("coins", 5), Reward::success("coins", 6));
        assert_ne!(Reward::success("coins", 5), Reward::success("gems", 5));
    }
}
