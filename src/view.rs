use crate::{
    error::WagerError,
    wager::{
        Outcome,
        WagerAttempt,
    },
};
use alloy::primitives::{
    Address,
    U256,
    utils::format_ether,
};
use serde::Serialize;
use std::fmt;

/// Where the session currently is. Mirrors the controller's internal state
/// without the per-step payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum WagerState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Simulating,
    AwaitingSignature,
    Submitted,
    Confirming,
    Resolving,
    /// Submitted but confirmation or event lookup failed; only a resolution
    /// retry moves it on.
    Unresolved,
    Resolved(Outcome),
}

impl WagerState {
    pub fn is_connected(self) -> bool {
        !matches!(self, WagerState::Idle | WagerState::Connecting)
    }

    /// True in the `Simulating..Resolving` span.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            WagerState::Simulating
                | WagerState::AwaitingSignature
                | WagerState::Submitted
                | WagerState::Confirming
                | WagerState::Resolving
        )
    }
}

impl fmt::Display for WagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerState::Idle => f.write_str("idle"),
            WagerState::Connecting => f.write_str("connecting"),
            WagerState::Connected => f.write_str("connected"),
            WagerState::Simulating => f.write_str("simulating"),
            WagerState::AwaitingSignature => f.write_str("awaiting signature"),
            WagerState::Submitted => f.write_str("submitted"),
            WagerState::Confirming => f.write_str("confirming"),
            WagerState::Resolving => f.write_str("resolving"),
            WagerState::Unresolved => f.write_str("unresolved"),
            WagerState::Resolved(outcome) => write!(f, "resolved ({outcome})"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum HouseBalance {
    #[default]
    NotLoaded,
    Known(U256),
    /// The last read failed. Not the same as an empty house.
    Unknown,
}

impl HouseBalance {
    pub fn display_eth(&self) -> String {
        match self {
            HouseBalance::NotLoaded => "Loading house balance...".to_string(),
            HouseBalance::Known(wei) => format!("House Balance: {} Ether", format_ether(*wei)),
            HouseBalance::Unknown => "House Balance: unavailable".to_string(),
        }
    }
}

/// Everything a presentation layer needs, published after every transition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub state: WagerState,
    pub account: Option<Address>,
    pub house_balance: HouseBalance,
    pub attempt: Option<WagerAttempt>,
    pub last_error: Option<WagerError>,
}

impl ViewState {
    pub fn connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Text for the current attempt's result line, if it has one.
    pub fn result_text(&self) -> Option<String> {
        let attempt = self.attempt.as_ref()?;
        match attempt.outcome {
            Outcome::Won => Some("You won the game!".to_string()),
            Outcome::Lost => Some("You lost the game.".to_string()),
            Outcome::Unknown => Some(match &attempt.summary {
                Some(summary) => format!("{summary} (no win or loss event found; result unknown)"),
                None => "No win or loss event was found for this wager; result unknown.".to_string(),
            }),
            Outcome::Pending => attempt.summary.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::wager::WagerRequest;
    use alloy::primitives::I256;
    use chrono::Utc;

    fn attempt(outcome: Outcome, summary: Option<&str>) -> WagerAttempt {
        let request = WagerRequest::new(5, I256::try_from(1i64).unwrap()).unwrap();
        let mut attempt = WagerAttempt::new(request, Utc::now());
        attempt.outcome = outcome;
        attempt.summary = summary.map(str::to_string);
        attempt
    }

    #[test]
    fn result_text__unknown_is_reported_as_ambiguous() {
        // given
        let view = ViewState {
            attempt: Some(attempt(Outcome::Unknown, Some("Game Played: x"))),
            ..ViewState::default()
        };

        // when
        let text = view.result_text().unwrap();

        // then
        assert!(text.starts_with("Game Played: x"));
        assert!(text.contains("result unknown"));
    }

    #[test]
    fn result_text__won_and_lost_messages() {
        let won = ViewState {
            attempt: Some(attempt(Outcome::Won, Some("Game Played: x"))),
            ..ViewState::default()
        };
        let lost = ViewState {
            attempt: Some(attempt(Outcome::Lost, None)),
            ..ViewState::default()
        };
        assert_eq!(won.result_text().as_deref(), Some("You won the game!"));
        assert_eq!(lost.result_text().as_deref(), Some("You lost the game."));
    }

    #[test]
    fn result_text__pending_without_summary_is_none() {
        let view = ViewState {
            attempt: Some(attempt(Outcome::Pending, None)),
            ..ViewState::default()
        };
        assert_eq!(view.result_text(), None);
        assert_eq!(ViewState::default().result_text(), None);
    }

    #[test]
    fn house_balance__formats_in_ether() {
        let wei = U256::from(1_500_000_000_000_000_000u128);
        let text = HouseBalance::Known(wei).display_eth();
        assert!(text.starts_with("House Balance: 1.5"));
        assert!(text.ends_with(" Ether"));
        assert_eq!(
            HouseBalance::NotLoaded.display_eth(),
            "Loading house balance..."
        );
    }

    #[test]
    fn wager_state__in_flight_span() {
        assert!(WagerState::Simulating.is_in_flight());
        assert!(WagerState::Resolving.is_in_flight());
        assert!(!WagerState::Connected.is_in_flight());
        assert!(!WagerState::Unresolved.is_in_flight());
        assert!(!WagerState::Resolved(Outcome::Won).is_in_flight());
    }
}
