use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Secondary volumes whose lifecycle is tied to an anchor volume.
///
/// When the anchor is unmounted for formatting, every mounted member is
/// unmounted first and remounted afterwards on the recovery path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoupledVolumeSet {
    pub anchor: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CouplingError {
    #[error("{0} is coupled to itself")]
    SelfCoupled(String),

    #[error("{member} is listed more than once under {anchor}")]
    DuplicateMember { anchor: String, member: String },

    #[error("{0} appears as an anchor more than once")]
    DuplicateAnchor(String),
}

/// Small fixed list of coupled sets, keyed by anchor path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CouplingTable {
    sets: Vec<CoupledVolumeSet>,
}

impl CouplingTable {
    pub fn new(sets: Vec<CoupledVolumeSet>) -> Result<Self, CouplingError> {
        let table = Self { sets };
        table.validate()?;
        Ok(table)
    }

    /// Members coupled to `path`, empty when `path` is not an anchor
    pub fn coupled_with(&self, path: &str) -> &[String] {
        self.sets
            .iter()
            .find(|set| set.anchor == path)
            .map(|set| set.members.as_slice())
            .unwrap_or(&[])
    }

    fn validate(&self) -> Result<(), CouplingError> {
        for (i, set) in self.sets.iter().enumerate() {
            if self.sets[..i].iter().any(|prev| prev.anchor == set.anchor) {
                return Err(CouplingError::DuplicateAnchor(set.anchor.clone()));
            }
            for (j, member) in set.members.iter().enumerate() {
                if *member == set.anchor {
                    return Err(CouplingError::SelfCoupled(member.clone()));
                }
                if set.members[..j].contains(member) {
                    return Err(CouplingError::DuplicateMember {
                        anchor: set.anchor.clone(),
                        member: member.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
