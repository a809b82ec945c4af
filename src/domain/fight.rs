//! Fight entity and its forward-only status machine.

use crate::domain::{Address, Lovelace, OutputRef, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minutes a PENDING fight waits for payment before it reads as expired.
pub const EXPIRY_MINUTES: i64 = 15;

/// Persisted fight status. Only ever advances one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FightStatus {
    /// Created, awaiting a matching payment.
    Pending,
    /// Payment matched and reward slot bound.
    Queued,
    /// Combat resolved, artifacts pinned, fighter records updated.
    Staged,
    /// Settlement transaction submitted.
    Minted,
    /// Settlement transaction observed on the ledger.
    Confirmed,
}

impl FightStatus {
    pub const ALL: [FightStatus; 5] = [
        FightStatus::Pending,
        FightStatus::Queued,
        FightStatus::Staged,
        FightStatus::Minted,
        FightStatus::Confirmed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FightStatus::Pending => "PENDING",
            FightStatus::Queued => "QUEUED",
            FightStatus::Staged => "STAGED",
            FightStatus::Minted => "MINTED",
            FightStatus::Confirmed => "CONFIRMED",
        }
    }

    /// The single status this one may advance to.
    pub fn next(&self) -> Option<FightStatus> {
        match self {
            FightStatus::Pending => Some(FightStatus::Queued),
            FightStatus::Queued => Some(FightStatus::Staged),
            FightStatus::Staged => Some(FightStatus::Minted),
            FightStatus::Minted => Some(FightStatus::Confirmed),
            FightStatus::Confirmed => None,
        }
    }

    pub fn can_advance_to(&self, target: FightStatus) -> bool {
        self.next() == Some(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for FightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FightStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(FightStatus::Pending),
            "QUEUED" => Ok(FightStatus::Queued),
            "STAGED" => Ok(FightStatus::Staged),
            "MINTED" => Ok(FightStatus::Minted),
            "CONFIRMED" => Ok(FightStatus::Confirmed),
            other => Err(format!("unknown fight status: {}", other)),
        }
    }
}

/// Status as presented to customers; EXPIRED is derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayStatus {
    AwaitingPayment,
    Expired,
    PaymentReceived,
    Minted,
}

/// One of the two participants of a fight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Corner {
    Red,
    Blue,
}

impl Corner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Corner::Red => "red",
            Corner::Blue => "blue",
        }
    }

    pub fn opponent(&self) -> Corner {
        match self {
            Corner::Red => Corner::Blue,
            Corner::Blue => Corner::Red,
        }
    }
}

impl FromStr for Corner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Corner::Red),
            "blue" => Ok(Corner::Blue),
            other => Err(format!("unknown corner: {}", other)),
        }
    }
}

/// Persisted result of a staged fight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FightOutcome {
    pub winner: Corner,
    pub red_life: u8,
    pub blue_life: u8,
    pub red_record: String,
    pub blue_record: String,
    pub red_ko: bool,
    pub blue_ko: bool,
    pub red_beatup: bool,
    pub blue_beatup: bool,
}

/// The central entity, as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fight {
    pub id: i64,
    pub red_fighter: String,
    pub blue_fighter: String,
    pub red_send_address: Option<Address>,
    pub blue_send_address: Option<Address>,
    pub payment_amount: Lovelace,
    pub payment_address: Address,
    pub status: FightStatus,
    pub created_at: TimeMs,
    pub minted_at: Option<TimeMs>,
    pub incoming: Option<OutputRef>,
    pub reward_hash: Option<String>,
    pub fight_hash: Option<String>,
    pub background: Option<String>,
    pub outcome: Option<FightOutcome>,
    pub settlement_tx: Option<String>,
    pub announcement_ref: Option<String>,
}

impl Fight {
    pub fn fighter(&self, corner: Corner) -> &str {
        match corner {
            Corner::Red => &self.red_fighter,
            Corner::Blue => &self.blue_fighter,
        }
    }

    pub fn send_address(&self, corner: Corner) -> Option<&Address> {
        match corner {
            Corner::Red => self.red_send_address.as_ref(),
            Corner::Blue => self.blue_send_address.as_ref(),
        }
    }

    pub fn is_expired(&self, now: TimeMs) -> bool {
        self.status == FightStatus::Pending
            && now.as_i64() - self.created_at.as_i64() > EXPIRY_MINUTES * 60_000
    }

    pub fn display_status(&self, now: TimeMs) -> DisplayStatus {
        match self.status {
            FightStatus::Pending if self.is_expired(now) => DisplayStatus::Expired,
            FightStatus::Pending => DisplayStatus::AwaitingPayment,
            FightStatus::Queued | FightStatus::Staged | FightStatus::Minted => {
                DisplayStatus::PaymentReceived
            }
            FightStatus::Confirmed => DisplayStatus::Minted,
        }
    }

    pub fn minutes_until_expired(&self, now: TimeMs) -> i64 {
        let deadline = self.created_at.plus_minutes(EXPIRY_MINUTES);
        ((deadline.as_i64() - now.as_i64()) / 60_000).max(0)
    }

    /// Winner and loser names once the fight has been staged.
    pub fn winner_and_loser(&self) -> Option<(&str, &str)> {
        self.outcome.as_ref().map(|o| {
            (
                self.fighter(o.winner),
                self.fighter(o.winner.opponent()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fight(status: FightStatus, created_ms: i64) -> Fight {
        Fight {
            id: 1,
            red_fighter: "Red001".to_string(),
            blue_fighter: "Blue001".to_string(),
            red_send_address: None,
            blue_send_address: None,
            payment_amount: Lovelace::new(10_000_000),
            payment_address: Address::new("addr_service"),
            status,
            created_at: TimeMs::new(created_ms),
            minted_at: None,
            incoming: None,
            reward_hash: None,
            fight_hash: None,
            background: None,
            outcome: None,
            settlement_tx: None,
            announcement_ref: None,
        }
    }

    #[test]
    fn test_only_single_forward_steps_are_allowed() {
        for current in FightStatus::ALL {
            for target in FightStatus::ALL {
                let allowed = current.can_advance_to(target);
                let expected = matches!(
                    (current, target),
                    (FightStatus::Pending, FightStatus::Queued)
                        | (FightStatus::Queued, FightStatus::Staged)
                        | (FightStatus::Staged, FightStatus::Minted)
                        | (FightStatus::Minted, FightStatus::Confirmed)
                );
                assert_eq!(allowed, expected, "{} -> {}", current, target);
            }
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in FightStatus::ALL {
            assert_eq!(status.as_str().parse::<FightStatus>().unwrap(), status);
        }
        assert!("EXPIRED".parse::<FightStatus>().is_err());
    }

    #[test]
    fn test_pending_expires_lazily_after_fifteen_minutes() {
        let f = fight(FightStatus::Pending, 0);
        assert_eq!(
            f.display_status(TimeMs::new(15 * 60_000)),
            DisplayStatus::AwaitingPayment
        );
        assert_eq!(
            f.display_status(TimeMs::new(15 * 60_000 + 1)),
            DisplayStatus::Expired
        );
        assert_eq!(f.minutes_until_expired(TimeMs::new(5 * 60_000)), 10);
        assert_eq!(f.minutes_until_expired(TimeMs::new(60 * 60_000)), 0);
    }

    #[test]
    fn test_display_status_for_paid_fights() {
        let later = TimeMs::new(24 * 60 * 60_000);
        for status in [FightStatus::Queued, FightStatus::Staged, FightStatus::Minted] {
            assert_eq!(
                fight(status, 0).display_status(later),
                DisplayStatus::PaymentReceived
            );
        }
        assert_eq!(
            fight(FightStatus::Confirmed, 0).display_status(later),
            DisplayStatus::Minted
        );
    }

    #[test]
    fn test_winner_and_loser_follow_outcome() {
        let mut f = fight(FightStatus::Staged, 0);
        assert!(f.winner_and_loser().is_none());
        f.outcome = Some(FightOutcome {
            winner: Corner::Blue,
            red_life: 20,
            blue_life: 70,
            red_record: "000-001".to_string(),
            blue_record: "001-000".to_string(),
            red_ko: false,
            blue_ko: false,
            red_beatup: true,
            blue_beatup: false,
        });
        assert_eq!(f.winner_and_loser(), Some(("Blue001", "Red001")));
    }
}
