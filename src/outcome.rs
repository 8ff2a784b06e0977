use crate::wager::{
    EventKind,
    GameEvent,
    GameEventData,
    GamePlayedRecord,
    Outcome,
};

/// Events found in the receipt's block, one list per queried kind.
///
/// Win and loss events are not tied to a player, so another game mined in the
/// same block can decide the outcome.
#[derive(Clone, Debug, Default)]
pub struct BlockEvents {
    played: Vec<GameEvent>,
    won: Vec<GameEvent>,
    lost: Vec<GameEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: Outcome,
    pub summary: Option<String>,
}

impl BlockEvents {
    pub fn record(&mut self, kind: EventKind, events: Vec<GameEvent>) {
        match kind {
            EventKind::GamePlayed => self.played = events,
            EventKind::GameWon => self.won = events,
            EventKind::GameLost => self.lost = events,
        }
    }

    /// `GameWon` beats `GameLost`, and `GamePlayed` only feeds the summary. With
    /// neither win nor loss present the outcome is `Unknown`, never a carried over
    /// value.
    pub fn resolve(&self) -> Resolution {
        let summary = self.played.iter().find_map(|event| match &event.data {
            GameEventData::Played(record) => Some(played_summary(record)),
            _ => None,
        });
        let outcome = if !self.won.is_empty() {
            Outcome::Won
        } else if !self.lost.is_empty() {
            Outcome::Lost
        } else {
            Outcome::Unknown
        };
        Resolution { outcome, summary }
    }
}

pub fn played_summary(record: &GamePlayedRecord) -> String {
    format!(
        "Game Played: Player {} predicted {}, House Number: {}, Bet Amount: {}",
        record.player, record.prediction, record.house_number, record.amount
    )
}
