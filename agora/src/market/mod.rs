use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type MarketName = String;
pub type ParticipantId = String;
pub type Quantity = u64;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrumentKey {
    pub category: String,
    pub id: String,
}

impl InstrumentKey {
    pub fn new(category: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.category, self.id)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Instrument {
    pub key: InstrumentKey,
    pub available: Quantity,
}

//Display produces the availability responder's wire line, parse_line reads it back
//on the aggregating side
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct InstrumentRecord {
    pub id: String,
    pub category: String,
    pub available: Quantity,
}

impl fmt::Display for InstrumentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Share: {}, Type: {}, Available: {}",
            self.id, self.category, self.available
        )
    }
}

impl InstrumentRecord {
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut id = None;
        let mut category = None;
        let mut available = None;
        for field in line.split(", ") {
            if let Some(value) = field.strip_prefix("Share: ") {
                id = Some(value.to_string());
            } else if let Some(value) = field.strip_prefix("Type: ") {
                category = Some(value.to_string());
            } else if let Some(value) = field.strip_prefix("Available: ") {
                available = value.trim().parse::<Quantity>().ok();
            }
        }
        Some(Self {
            id: id?,
            category: category?,
            available: available?,
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct HoldingRecord {
    pub key: InstrumentKey,
    pub owned: Quantity,
}

//Tagged so the variant survives the trip through the http boundary and back into a client
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum MarketError {
    AlreadyExists {
        key: InstrumentKey,
    },
    InstrumentNotFound {
        category: String,
        id: String,
    },
    HoldingNotFound {
        id: String,
    },
    NotFoundAnywhere {
        id: String,
    },
    InsufficientCapacity {
        key: InstrumentKey,
        requested: Quantity,
        available: Quantity,
    },
    InsufficientHoldings {
        key: InstrumentKey,
        requested: Quantity,
        owned: Quantity,
    },
    InvalidMarket {
        market: MarketName,
    },
    RemoteUnavailable {
        markets: Vec<MarketName>,
    },
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketError::AlreadyExists { key } => {
                write!(
                    f,
                    "Share already exists with ID {} and Type {}",
                    key.id, key.category
                )
            }
            MarketError::InstrumentNotFound { category, id } => {
                write!(f, "Share not found: {category}-{id}")
            }
            MarketError::HoldingNotFound { id } => {
                write!(f, "You do not own share {id}")
            }
            MarketError::NotFoundAnywhere { id } => {
                write!(f, "Share {id} not found in any market")
            }
            MarketError::InsufficientCapacity { .. } => {
                write!(f, "Purchase failed. Not enough shares available")
            }
            MarketError::InsufficientHoldings { .. } => {
                write!(f, "Sell failed. You cannot sell more than you own")
            }
            MarketError::InvalidMarket { market } => {
                write!(f, "Invalid target market: {market}")
            }
            MarketError::RemoteUnavailable { markets } => {
                write!(f, "Remote market unavailable: {}", markets.join(", "))
            }
        }
    }
}

impl std::error::Error for MarketError {}

type InstrumentDirectory = BTreeMap<String, BTreeMap<String, Instrument>>;
type HoldingsLedger = BTreeMap<ParticipantId, BTreeMap<InstrumentKey, Quantity>>;

//BTreeMaps keep listings and holdings reports in a stable sorted order
#[derive(Clone, Debug)]
pub struct MarketNode {
    name: MarketName,
    instruments: InstrumentDirectory,
    holdings: HoldingsLedger,
}

impl MarketNode {
    pub fn new(name: impl Into<MarketName>) -> Self {
        Self {
            name: name.into(),
            instruments: BTreeMap::new(),
            holdings: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_instrument(
        &mut self,
        category: &str,
        id: &str,
        capacity: Quantity,
    ) -> Result<(), MarketError> {
        let by_id = self.instruments.entry(category.to_string()).or_default();
        if by_id.contains_key(id) {
            return Err(MarketError::AlreadyExists {
                key: InstrumentKey::new(category, id),
            });
        }
        by_id.insert(
            id.to_string(),
            Instrument {
                key: InstrumentKey::new(category, id),
                available: capacity,
            },
        );
        Ok(())
    }

    //Outstanding holdings are not cleared here; they become orphans and a later sell
    //against them fails with InstrumentNotFound
    pub fn remove_instrument(&mut self, category: &str, id: &str) -> Result<(), MarketError> {
        let removed = self
            .instruments
            .get_mut(category)
            .and_then(|by_id| by_id.remove(id));
        if removed.is_none() {
            return Err(MarketError::InstrumentNotFound {
                category: category.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn purchase(
        &mut self,
        participant: &str,
        category: &str,
        id: &str,
        qty: Quantity,
    ) -> Result<(), MarketError> {
        let instrument = self
            .instruments
            .get_mut(category)
            .and_then(|by_id| by_id.get_mut(id))
            .ok_or_else(|| MarketError::InstrumentNotFound {
                category: category.to_string(),
                id: id.to_string(),
            })?;
        if qty > instrument.available {
            return Err(MarketError::InsufficientCapacity {
                key: instrument.key.clone(),
                requested: qty,
                available: instrument.available,
            });
        }
        instrument.available -= qty;
        let key = instrument.key.clone();
        let owned = self
            .holdings
            .entry(participant.to_string())
            .or_default()
            .entry(key)
            .or_insert(0);
        *owned += qty;
        Ok(())
    }

    //The caller supplies only the id; the category comes back out of the holding key.
    //Validation happens before any mutation so a failed sell leaves state untouched.
    pub fn sell(
        &mut self,
        participant: &str,
        id: &str,
        qty: Quantity,
    ) -> Result<InstrumentKey, MarketError> {
        let key = self
            .holdings
            .get(participant)
            .and_then(|owned| owned.keys().find(|key| key.id == id))
            .cloned()
            .ok_or_else(|| MarketError::HoldingNotFound { id: id.to_string() })?;

        let owned = *self
            .holdings
            .get(participant)
            .and_then(|holdings| holdings.get(&key))
            .unwrap_or(&0);
        if qty > owned {
            return Err(MarketError::InsufficientHoldings {
                key,
                requested: qty,
                owned,
            });
        }

        // Orphan check: the instrument may have been removed after the purchase.
        let instrument = self
            .instruments
            .get_mut(&key.category)
            .and_then(|by_id| by_id.get_mut(&key.id))
            .ok_or_else(|| MarketError::InstrumentNotFound {
                category: key.category.clone(),
                id: key.id.clone(),
            })?;
        instrument.available += qty;

        let holdings = self
            .holdings
            .get_mut(participant)
            .expect("holding checked above");
        if qty == owned {
            holdings.remove(&key);
            if holdings.is_empty() {
                self.holdings.remove(participant);
            }
        } else {
            holdings.insert(key.clone(), owned - qty);
        }
        Ok(key)
    }

    pub fn availability(&self, category: &str) -> Vec<InstrumentRecord> {
        self.instruments
            .get(category)
            .map(|by_id| {
                by_id
                    .values()
                    .map(|instrument| InstrumentRecord {
                        id: instrument.key.id.clone(),
                        category: instrument.key.category.clone(),
                        available: instrument.available,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn holdings_for(&self, participant: &str) -> Vec<HoldingRecord> {
        self.holdings
            .get(participant)
            .map(|owned| {
                owned
                    .iter()
                    .map(|(key, owned)| HoldingRecord {
                        key: key.clone(),
                        owned: *owned,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{InstrumentRecord, MarketError, MarketNode};

    fn setup() -> MarketNode {
        let mut node = MarketNode::new("NewYork");
        node.add_instrument("Equity", "S1", 100).unwrap();
        node
    }

    #[test]
    fn test_that_duplicate_add_fails() {
        let mut node = setup();
        let err = node.add_instrument("Equity", "S1", 50).unwrap_err();
        assert!(matches!(err, MarketError::AlreadyExists { .. }));
        // Same id under a different category is a distinct instrument
        node.add_instrument("Bonus", "S1", 50).unwrap();
    }

    #[test]
    fn test_that_purchase_and_sell_round_trip_restores_state() {
        let mut node = setup();
        node.purchase("NYKB1001", "Equity", "S1", 40).unwrap();
        assert_eq!(node.availability("Equity")[0].available, 60);
        let holdings = node.holdings_for("NYKB1001");
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].owned, 40);
        assert_eq!(holdings[0].key.to_string(), "Equity-S1");

        let key = node.sell("NYKB1001", "S1", 40).unwrap();
        assert_eq!(key.category, "Equity");
        assert_eq!(node.availability("Equity")[0].available, 100);
        assert!(node.holdings_for("NYKB1001").is_empty());
    }

    #[test]
    fn test_that_purchase_at_boundary_drains_capacity() {
        let mut node = setup();
        node.purchase("NYKB1001", "Equity", "S1", 100).unwrap();
        assert_eq!(node.availability("Equity")[0].available, 0);
    }

    #[test]
    fn test_that_purchase_over_capacity_fails_without_mutation() {
        let mut node = setup();
        let err = node.purchase("NYKB1001", "Equity", "S1", 101).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientCapacity { .. }));
        assert_eq!(node.availability("Equity")[0].available, 100);
        assert!(node.holdings_for("NYKB1001").is_empty());
    }

    #[test]
    fn test_that_partial_sell_keeps_holding_positive() {
        let mut node = setup();
        node.purchase("NYKB1001", "Equity", "S1", 40).unwrap();
        node.sell("NYKB1001", "S1", 15).unwrap();
        let holdings = node.holdings_for("NYKB1001");
        assert_eq!(holdings[0].owned, 25);
        assert_eq!(node.availability("Equity")[0].available, 75);
    }

    #[test]
    fn test_that_overselling_fails_without_mutation() {
        let mut node = setup();
        node.purchase("NYKB1001", "Equity", "S1", 40).unwrap();
        let err = node.sell("NYKB1001", "S1", 41).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientHoldings { .. }));
        assert_eq!(node.holdings_for("NYKB1001")[0].owned, 40);
        assert_eq!(node.availability("Equity")[0].available, 60);
    }

    #[test]
    fn test_that_sell_against_removed_instrument_fails_gracefully() {
        let mut node = setup();
        node.purchase("NYKB1001", "Equity", "S1", 40).unwrap();
        node.remove_instrument("Equity", "S1").unwrap();

        let err = node.sell("NYKB1001", "S1", 40).unwrap_err();
        assert!(matches!(err, MarketError::InstrumentNotFound { .. }));
        // The orphaned holding survives the failed sell
        assert_eq!(node.holdings_for("NYKB1001")[0].owned, 40);
    }

    #[test]
    fn test_that_missing_instrument_reports_not_found() {
        let mut node = setup();
        let err = node.purchase("NYKB1001", "Equity", "S9", 10).unwrap_err();
        assert!(matches!(err, MarketError::InstrumentNotFound { .. }));
        let err = node.sell("NYKB1001", "S9", 10).unwrap_err();
        assert!(matches!(err, MarketError::HoldingNotFound { .. }));
    }

    #[test]
    fn test_that_remove_missing_instrument_fails() {
        let mut node = setup();
        let err = node.remove_instrument("Equity", "S9").unwrap_err();
        assert!(matches!(err, MarketError::InstrumentNotFound { .. }));
    }

    #[test]
    fn test_that_availability_lists_sorted_records() {
        let mut node = setup();
        node.add_instrument("Equity", "S3", 10).unwrap();
        node.add_instrument("Equity", "S2", 20).unwrap();
        let records: Vec<String> = node
            .availability("Equity")
            .iter()
            .map(|record| record.id.clone())
            .collect();
        assert_eq!(records, vec!["S1", "S2", "S3"]);
        assert!(node.availability("Dividend").is_empty());
    }

    #[test]
    fn test_that_record_line_round_trips() {
        let record = InstrumentRecord {
            id: "S1".to_string(),
            category: "Equity".to_string(),
            available: 60,
        };
        let line = record.to_string();
        assert_eq!(line, "Share: S1, Type: Equity, Available: 60");
        assert_eq!(InstrumentRecord::parse_line(&line).unwrap(), record);
        assert!(InstrumentRecord::parse_line("INVALID_REQUEST").is_none());
    }
}
