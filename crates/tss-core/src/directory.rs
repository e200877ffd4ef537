//! Party directory
//!
//! The agreed-upon set of participants. Every node must derive the same
//! sorted order from the same identifiers, since engines index parties by
//! their position in it.

use crate::types::PartyIdentity;
use crate::{Error, Result};
use k256::{
    elliptic_curve::{bigint::U256, ops::Reduce},
    Scalar,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Raw participant entry as supplied by configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyIdentifier {
    /// Unique party id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Raw key material the sort key is derived from
    #[serde(default)]
    pub key: String,
    /// Routing address, if the transport needs one
    #[serde(default)]
    pub address: Option<String>,
}

impl PartyIdentifier {
    pub fn new(id: &str, name: &str, key: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            key: key.to_string(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }
}

/// Read-only mapping from party id to identity and routing address
#[derive(Debug, Clone)]
pub struct PartyDirectory {
    sorted: Vec<PartyIdentity>,
    by_id: HashMap<String, usize>,
    addresses: HashMap<String, String>,
}

impl PartyDirectory {
    /// Build the directory from configured identifiers
    ///
    /// The resulting order depends only on the set of identifiers, not on the
    /// order they are supplied in.
    pub fn build(identifiers: Vec<PartyIdentifier>) -> Result<Self> {
        if identifiers.is_empty() {
            return Err(Error::InvalidConfig("No parties configured".into()));
        }

        let mut keyed = Vec::with_capacity(identifiers.len());
        let mut addresses = HashMap::new();
        let mut seen = HashSet::new();
        for identifier in identifiers {
            if identifier.id.trim().is_empty() {
                return Err(Error::InvalidConfig("Empty party id".into()));
            }
            if !seen.insert(identifier.id.clone()) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate party id: {}",
                    identifier.id
                )));
            }

            let key = derive_key(&identifier.id, &identifier.key);
            if key == [0u8; 32] {
                return Err(Error::InvalidConfig(format!(
                    "Party {} derives a zero key",
                    identifier.id
                )));
            }
            if let Some(address) = identifier.address {
                addresses.insert(identifier.id.clone(), address);
            }
            keyed.push((identifier.id, identifier.name, key));
        }

        // Big-endian bytes compare in numeric order.
        keyed.sort_by(|a, b| a.2.cmp(&b.2));

        if let Some(pair) = keyed.windows(2).find(|pair| pair[0].2 == pair[1].2) {
            return Err(Error::InvalidConfig(format!(
                "Parties {} and {} derive the same key",
                pair[0].0, pair[1].0
            )));
        }

        let sorted: Vec<PartyIdentity> = keyed
            .into_iter()
            .enumerate()
            .map(|(index, (id, name, key))| PartyIdentity {
                id,
                name,
                key,
                index,
            })
            .collect();
        let by_id = sorted
            .iter()
            .map(|party| (party.id.clone(), party.index))
            .collect();

        Ok(Self {
            sorted,
            by_id,
            addresses,
        })
    }

    /// All parties in sorted order
    pub fn parties(&self) -> &[PartyIdentity] {
        &self.sorted
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Look up a party by id
    pub fn get(&self, id: &str) -> Option<&PartyIdentity> {
        self.by_id.get(id).map(|&index| &self.sorted[index])
    }

    /// Look up a party by id, failing on unknown ids
    pub fn require(&self, id: &str) -> Result<&PartyIdentity> {
        self.get(id).ok_or_else(|| Error::UnknownParty(id.to_string()))
    }

    /// Routing address of a party, when configured
    pub fn address(&self, id: &str) -> Option<&str> {
        self.addresses.get(id).map(String::as_str)
    }

    /// Resolve a set of ids into identities, keeping directory order
    pub fn subset(&self, ids: &[String]) -> Result<Vec<PartyIdentity>> {
        for id in ids {
            self.require(id)?;
        }
        Ok(self
            .sorted
            .iter()
            .filter(|party| ids.contains(&party.id))
            .cloned()
            .collect())
    }
}

/// Derive a party's sort key
///
/// The raw key string is read as a big-endian integer of its bytes. Keys that
/// do not fit in 32 bytes, and missing keys, fall back to a SHA-256 digest.
fn derive_key(id: &str, raw: &str) -> [u8; 32] {
    let bytes: [u8; 32] = if raw.is_empty() {
        Sha256::digest(id.as_bytes()).into()
    } else if raw.len() > 32 {
        Sha256::digest(raw.as_bytes()).into()
    } else {
        let mut padded = [0u8; 32];
        padded[32 - raw.len()..].copy_from_slice(raw.as_bytes());
        padded
    };
    let scalar = <Scalar as Reduce<U256>>::reduce_bytes(&bytes.into());
    scalar.to_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifiers() -> Vec<PartyIdentifier> {
        vec![
            PartyIdentifier::new("p1", "tss1", "1"),
            PartyIdentifier::new("p2", "tss2", "2"),
            PartyIdentifier::new("p3", "tss3", "3"),
            PartyIdentifier::new("p4", "tss4", "4"),
        ]
    }

    fn ids(directory: &PartyDirectory) -> Vec<String> {
        directory.parties().iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn test_build_is_order_independent() {
        let forward = PartyDirectory::build(identifiers()).unwrap();

        let mut reversed_input = identifiers();
        reversed_input.reverse();
        let reversed = PartyDirectory::build(reversed_input).unwrap();

        let mut rotated_input = identifiers();
        rotated_input.rotate_left(2);
        let rotated = PartyDirectory::build(rotated_input).unwrap();

        assert_eq!(forward.parties(), reversed.parties());
        assert_eq!(forward.parties(), rotated.parties());
        assert_eq!(ids(&forward), vec!["p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn test_indexes_follow_sorted_keys() {
        let directory = PartyDirectory::build(vec![
            PartyIdentifier::new("nine", "", "9"),
            PartyIdentifier::new("ten", "", "10"),
        ])
        .unwrap();

        // "10" is 0x3130, larger than "9" (0x39)
        assert_eq!(ids(&directory), vec!["nine", "ten"]);
        assert_eq!(directory.require("ten").unwrap().index, 1);
    }

    #[test]
    fn test_key_from_raw_bytes() {
        let directory = PartyDirectory::build(identifiers()).unwrap();
        let p1 = directory.require("p1").unwrap();
        let mut expected = [0u8; 32];
        expected[31] = b'1';
        assert_eq!(p1.key, expected);
    }

    #[test]
    fn test_missing_key_derives_from_id() {
        let a = PartyDirectory::build(vec![
            PartyIdentifier::new("alice", "", ""),
            PartyIdentifier::new("bob", "", ""),
        ])
        .unwrap();
        let b = PartyDirectory::build(vec![
            PartyIdentifier::new("bob", "", ""),
            PartyIdentifier::new("alice", "", ""),
        ])
        .unwrap();
        assert_eq!(a.parties(), b.parties());
    }

    #[test]
    fn test_rejects_malformed_identifiers() {
        let empty = PartyDirectory::build(vec![PartyIdentifier::new(" ", "", "1")]);
        assert!(matches!(empty, Err(Error::InvalidConfig(_))));

        let duplicate_id = PartyDirectory::build(vec![
            PartyIdentifier::new("p1", "", "1"),
            PartyIdentifier::new("p1", "", "2"),
        ]);
        assert!(matches!(duplicate_id, Err(Error::InvalidConfig(_))));

        let duplicate_key = PartyDirectory::build(vec![
            PartyIdentifier::new("p1", "", "1"),
            PartyIdentifier::new("p2", "", "1"),
        ]);
        assert!(matches!(duplicate_key, Err(Error::InvalidConfig(_))));

        assert!(matches!(
            PartyDirectory::build(Vec::new()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_subset_keeps_directory_order() {
        let directory = PartyDirectory::build(identifiers()).unwrap();
        let subset = directory
            .subset(&["p3".to_string(), "p1".to_string()])
            .unwrap();
        assert_eq!(subset[0].id, "p1");
        assert_eq!(subset[1].id, "p3");

        assert!(matches!(
            directory.subset(&["p9".to_string()]),
            Err(Error::UnknownParty(_))
        ));
    }

    #[test]
    fn test_addresses() {
        let directory = PartyDirectory::build(vec![
            PartyIdentifier::new("p1", "", "1").with_address("http://127.0.0.1:50051"),
            PartyIdentifier::new("p2", "", "2"),
        ])
        .unwrap();
        assert_eq!(directory.address("p1"), Some("http://127.0.0.1:50051"));
        assert_eq!(directory.address("p2"), None);
    }
}
