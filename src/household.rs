//! # Household Clustering
//!
//! Union-find over household relationships between records that each produce
//! a first-class target record. Every generating record starts in its own
//! household; relationships flagged as household links merge the two
//! households and name one side as head of household.
//!
//! Side-effecting iteration always walks households and members in sorted
//! order so that reruns produce identical synthetic ids and fallback heads.

use crate::model::SourceRef;
use crate::placeholder::Placeholder;
use anyhow::Result;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Prefix of the synthetic ref given to the record built for a household.
pub const SYNTHETIC_HOUSEHOLD_PREFIX: &str = "SynthHH";

/// Role code carried by a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HouseholdRole {
    /// Not a household relationship.
    NoGrouping,
    /// Household link; the first endpoint is head of household.
    FirstIsHead,
    /// Household link; the second endpoint is head of household.
    SecondIsHead,
}

impl HouseholdRole {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(HouseholdRole::NoGrouping),
            1 => Some(HouseholdRole::FirstIsHead),
            2 => Some(HouseholdRole::SecondIsHead),
            _ => None,
        }
    }
}

/// A relationship between two source records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipEdge {
    /// Source ref of the relationship itself, for error messages.
    pub reference: String,
    pub first: SourceRef,
    pub second: SourceRef,
    /// Raw role code; `None` when the source left it null.
    pub role: Option<u8>,
}

impl RelationshipEdge {
    pub fn new(reference: &str, first: &str, second: &str, role: Option<u8>) -> Self {
        Self {
            reference: reference.to_string(),
            first: SourceRef::from(first),
            second: SourceRef::from(second),
            role,
        }
    }
}

/// Index of a household while clustering is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HouseholdId(pub u32);

impl fmt::Display for HouseholdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("relationship {reference:?} has no household role")]
    MissingRole { reference: String },
    #[error("relationship {reference:?} has unrecognized household role {code}")]
    UnknownRole { reference: String, code: u8 },
    #[error("generating record has an empty ref")]
    EmptyRef,
    #[error("ref {0:?} listed twice among generating records")]
    DuplicateMember(SourceRef),
    #[error(
        "household {household} (containing {member}) already has head {existing}, cannot make {requested} head"
    )]
    ConflictingHead {
        household: HouseholdId,
        member: SourceRef,
        existing: SourceRef,
        requested: SourceRef,
    },
}

/// A resolved household: sorted members plus one head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseholdCluster {
    /// Members in lexicographic order.
    pub members: Vec<SourceRef>,
    pub head: SourceRef,
    /// `false` when no relationship named a head and the fallback was used.
    pub explicit_head: bool,
}

impl HouseholdCluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, member: &SourceRef) -> bool {
        self.members.binary_search(member).is_ok()
    }

    /// Deterministic ref of the record built for this household.
    pub fn synthetic_ref(&self) -> SourceRef {
        let smallest = self.members.first().map(SourceRef::as_str).unwrap_or_default();
        SourceRef::new(format!("{SYNTHETIC_HOUSEHOLD_PREFIX}{smallest}"))
    }

    /// A fresh placeholder pointing at the household record. Each member gets
    /// its own value so resolving one member never touches another's field.
    pub fn member_placeholder(&self) -> Result<Placeholder> {
        Placeholder::needs(&self.synthetic_ref())
    }
}

/// All households, ordered by synthetic ref.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Households {
    pub clusters: Vec<HouseholdCluster>,
}

impl Households {
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster_for(&self, member: &SourceRef) -> Option<&HouseholdCluster> {
        self.clusters.iter().find(|cluster| cluster.contains(member))
    }

    /// Households with more than one member.
    pub fn merged(&self) -> impl Iterator<Item = &HouseholdCluster> {
        self.clusters.iter().filter(|cluster| cluster.len() > 1)
    }
}

/// Union-find state over household membership.
#[derive(Debug, Clone, Default)]
pub struct HouseholdDsu {
    /// Member -> household it currently belongs to.
    household_of: FxHashMap<SourceRef, HouseholdId>,
    /// Household -> members. Ordered so merges and output are deterministic.
    members: BTreeMap<HouseholdId, Vec<SourceRef>>,
    heads: BTreeMap<HouseholdId, SourceRef>,
}

impl HouseholdDsu {
    /// One singleton household per generating record. Refs are sorted first so
    /// household ids do not depend on input order.
    pub fn new<'a>(generating: impl IntoIterator<Item = &'a SourceRef>) -> Result<Self, ClusterError> {
        let mut sorted: Vec<&SourceRef> = generating.into_iter().collect();
        sorted.sort();
        let mut dsu = Self::default();
        for (index, member) in sorted.into_iter().enumerate() {
            if member.is_empty() {
                return Err(ClusterError::EmptyRef);
            }
            let id = HouseholdId(index as u32);
            if dsu.household_of.insert(member.clone(), id).is_some() {
                return Err(ClusterError::DuplicateMember(member.clone()));
            }
            dsu.members.insert(id, vec![member.clone()]);
        }
        Ok(dsu)
    }

    pub fn has_member(&self, member: &SourceRef) -> bool {
        self.household_of.contains_key(member)
    }

    pub fn find(&self, member: &SourceRef) -> Option<HouseholdId> {
        self.household_of.get(member).copied()
    }

    pub fn household_count(&self) -> usize {
        self.members.len()
    }

    /// Merge the households of `a` and `b`. Members of the lower-indexed
    /// household move to the higher one and the emptied household is removed.
    /// Returns the surviving household.
    pub fn union(&mut self, a: &SourceRef, b: &SourceRef) -> Result<Option<HouseholdId>, ClusterError> {
        let (Some(ha), Some(hb)) = (self.find(a), self.find(b)) else {
            return Ok(None);
        };
        if ha == hb {
            return Ok(Some(ha));
        }
        let (absorbed, survivor) = if ha < hb { (ha, hb) } else { (hb, ha) };

        // Carry an existing head across; two different heads cannot share a household.
        if let Some(absorbed_head) = self.heads.remove(&absorbed) {
            match self.heads.get(&survivor) {
                Some(existing) if *existing != absorbed_head => {
                    let existing = existing.clone();
                    self.heads.insert(absorbed, absorbed_head.clone());
                    return Err(ClusterError::ConflictingHead {
                        household: survivor,
                        member: a.clone(),
                        existing,
                        requested: absorbed_head,
                    });
                }
                _ => {
                    self.heads.insert(survivor, absorbed_head);
                }
            }
        }

        let moved = self.members.remove(&absorbed).unwrap_or_default();
        for member in &moved {
            self.household_of.insert(member.clone(), survivor);
        }
        self.members.entry(survivor).or_default().extend(moved);
        Ok(Some(survivor))
    }

    /// Name `member` head of its household. Re-asserting the same head is fine;
    /// a different one is an error.
    pub fn make_head(&mut self, member: &SourceRef) -> Result<(), ClusterError> {
        let Some(household) = self.find(member) else {
            return Ok(());
        };
        match self.heads.get(&household) {
            None => {
                self.heads.insert(household, member.clone());
                Ok(())
            }
            Some(existing) if existing == member => Ok(()),
            Some(existing) => Err(ClusterError::ConflictingHead {
                household,
                member: member.clone(),
                existing: existing.clone(),
                requested: member.clone(),
            }),
        }
    }

    /// Finished households ordered by synthetic ref.
    pub fn into_households(self) -> Households {
        let mut clusters: Vec<HouseholdCluster> = self
            .members
            .into_iter()
            .map(|(id, mut members)| {
                members.sort();
                let (head, explicit_head) = match self.heads.get(&id) {
                    Some(head) => (head.clone(), true),
                    None => (members[0].clone(), false),
                };
                HouseholdCluster {
                    members,
                    head,
                    explicit_head,
                }
            })
            .collect();
        clusters.sort_by(|a, b| a.members[0].cmp(&b.members[0]));
        Households { clusters }
    }
}

/// Cluster `generating` records into households using `edges`.
///
/// Edges touching a record outside `generating` are skipped with a warning;
/// a missing or unknown role code fails the whole pass.
pub fn cluster_households<'a>(
    generating: impl IntoIterator<Item = &'a SourceRef>,
    edges: &[RelationshipEdge],
) -> Result<Households, ClusterError> {
    let mut dsu = HouseholdDsu::new(generating)?;

    for edge in edges {
        let code = edge.role.ok_or_else(|| ClusterError::MissingRole {
            reference: edge.reference.clone(),
        })?;
        let role = HouseholdRole::from_code(code).ok_or_else(|| ClusterError::UnknownRole {
            reference: edge.reference.clone(),
            code,
        })?;
        let head = match role {
            HouseholdRole::NoGrouping => continue,
            HouseholdRole::FirstIsHead => &edge.first,
            HouseholdRole::SecondIsHead => &edge.second,
        };
        if !dsu.has_member(&edge.first) || !dsu.has_member(&edge.second) {
            warn!(
                relationship = %edge.reference,
                first = %edge.first,
                second = %edge.second,
                "household relationship includes a record outside the household kind; skipping"
            );
            continue;
        }
        dsu.union(&edge.first, &edge.second)?;
        dsu.make_head(head)?;
    }

    Ok(dsu.into_households())
}

/// Members grouped by household, for callers that only need membership.
pub fn membership(households: &Households) -> BTreeMap<SourceRef, BTreeSet<SourceRef>> {
    households
        .clusters
        .iter()
        .map(|cluster| {
            (
                cluster.synthetic_ref(),
                cluster.members.iter().cloned().collect(),
            )
        })
        .collect()
}
