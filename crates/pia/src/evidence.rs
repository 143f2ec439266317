use crate::score::{PSM_FDR_SCORE, PSM_LOCAL_FDR, PSM_Q_VALUE};
use crate::structure::{ClusterId, GroupId};
use fnv::{FnvHashMap, FnvHasher};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct FileId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PsmIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PeptideIx(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ProteinIx(pub u32);

/// Deterministic hash of a peptide sequence, optionally including its modifications
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeptideId(pub u64);

impl PeptideId {
    pub fn new(sequence: &str, modifications: Option<&str>) -> Self {
        let mut hasher = FnvHasher::default();
        sequence.hash(&mut hasher);
        if let Some(modifications) = modifications {
            modifications.hash(&mut hasher);
        }
        PeptideId(hasher.finish())
    }
}

/// Decoy status of an entity: either set explicitly (by import or by decoy
/// marking), or left unset and derived from related entities
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Decoy {
    #[default]
    Unset,
    Explicit(bool),
}

impl Decoy {
    pub fn explicit(&self) -> Option<bool> {
        match self {
            Decoy::Unset => None,
            Decoy::Explicit(decoy) => Some(*decoy),
        }
    }
}

impl From<Option<bool>> for Decoy {
    fn from(value: Option<bool>) -> Self {
        value.map(Decoy::Explicit).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    /// 0 is the N-terminus, `sequence.len() + 1` the C-terminus
    pub position: u32,
    pub mass_shift: f64,
    pub residue: Option<char>,
}

impl Display for Modification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.position)?;
        if let Some(residue) = self.residue {
            write!(f, "{}", residue)?;
        }
        write!(f, "[{:+.4}]", self.mass_shift)
    }
}

/// Canonical string for a set of modifications, independent of their order
pub fn modification_key(modifications: &[Modification]) -> String {
    modifications
        .iter()
        .sorted_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| a.mass_shift.total_cmp(&b.mass_shift))
        })
        .map(|m| m.to_string())
        .join(";")
}

/// A peptide-spectrum match. Identity is (`file`, `id`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Psm {
    pub file: FileId,
    pub id: String,
    pub spectrum: String,
    pub sequence: String,
    pub charge: u8,
    pub modifications: Vec<Modification>,
    pub rt: Option<f64>,
    pub experimental_mz: Option<f64>,
    pub theoretical_mass: Option<f64>,
    /// Search engine scores, keyed by accession
    pub scores: FnvHashMap<String, f64>,
    pub decoy: Decoy,
    pub peptide: PeptideIx,

    pub fdr: Option<f64>,
    pub q_value: Option<f64>,
    pub fdr_score: Option<f64>,
}

impl Psm {
    pub fn new<S: Into<String>>(file: FileId, id: S, sequence: S) -> Self {
        Psm {
            file,
            id: id.into(),
            spectrum: String::default(),
            sequence: sequence.into(),
            charge: 0,
            modifications: Vec::default(),
            rt: None,
            experimental_mz: None,
            theoretical_mass: None,
            scores: FnvHashMap::default(),
            decoy: Decoy::Unset,
            peptide: PeptideIx::default(),
            fdr: None,
            q_value: None,
            fdr_score: None,
        }
    }

    pub fn with_score<S: Into<String>>(mut self, accession: S, value: f64) -> Self {
        self.scores.insert(accession.into(), value);
        self
    }

    pub fn key(&self) -> (FileId, &str) {
        (self.file, &self.id)
    }

    /// Look up a score by accession. FDR values computed for this PSM take
    /// precedence over imported scores with the same accession.
    pub fn score(&self, accession: &str) -> Option<f64> {
        let computed = match accession {
            PSM_LOCAL_FDR => self.fdr,
            PSM_Q_VALUE => self.q_value,
            PSM_FDR_SCORE => self.fdr_score,
            _ => None,
        };
        computed.or_else(|| self.scores.get(accession).copied())
    }

    pub fn modification_key(&self) -> String {
        modification_key(&self.modifications)
    }

    /// Drop every score not named in `accessions`
    pub fn retain_scores<S: AsRef<str>>(&mut self, accessions: &[S]) {
        self.scores
            .retain(|k, _| accessions.iter().any(|a| a.as_ref() == k));
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peptide {
    pub id: PeptideId,
    pub sequence: String,
    /// Only set when peptide identity includes modifications
    pub modifications: Option<String>,
    pub psms: Vec<PsmIx>,
    pub proteins: Vec<ProteinIx>,
    pub group: Option<GroupId>,
    pub cluster: Option<ClusterId>,
}

impl Peptide {
    pub fn new(sequence: String, modifications: Option<String>) -> Self {
        Peptide {
            id: PeptideId::new(&sequence, modifications.as_deref()),
            sequence,
            modifications,
            psms: Vec::default(),
            proteins: Vec::default(),
            group: None,
            cluster: None,
        }
    }

    /// Does this peptide map to exactly one protein?
    pub fn is_unique(&self) -> bool {
        self.proteins.len() == 1
    }
}

/// A protein. Accessions are unique within one structure, and two proteins
/// are equal iff their accessions are.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Protein {
    pub accession: Arc<str>,
    pub description: Option<String>,
    pub sequence: Option<String>,
    pub decoy: Decoy,
    pub group: Option<GroupId>,
    pub cluster: Option<ClusterId>,
}

impl Protein {
    pub fn new<S: AsRef<str>>(accession: S) -> Self {
        Protein {
            accession: Arc::from(accession.as_ref()),
            description: None,
            sequence: None,
            decoy: Decoy::Unset,
            group: None,
            cluster: None,
        }
    }

    pub fn is_decoy(&self) -> bool {
        self.decoy.explicit().unwrap_or(false)
    }
}

impl PartialEq for Protein {
    fn eq(&self, other: &Self) -> bool {
        self.accession == other.accession
    }
}

impl Eq for Protein {}

impl Hash for Protein {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.accession.hash(state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peptide_identity() {
        let a = PeptideId::new("PEPTIDE", None);
        assert_eq!(a, PeptideId::new("PEPTIDE", None));
        assert_ne!(a, PeptideId::new("PEPTIDE", Some("3[+15.9949]")));
        assert_ne!(a, PeptideId::new("PEPTIDR", None));
    }

    #[test]
    fn modification_key_is_order_independent() {
        let ox = Modification {
            position: 3,
            mass_shift: 15.9949,
            residue: Some('M'),
        };
        let nterm = Modification {
            position: 0,
            mass_shift: 42.0106,
            residue: None,
        };
        assert_eq!(
            modification_key(&[ox.clone(), nterm.clone()]),
            modification_key(&[nterm, ox])
        );
        assert_eq!(modification_key(&[]), "");
    }

    #[test]
    fn computed_scores_take_precedence() {
        let mut psm = Psm::new(FileId(1), "scan=1", "PEPTIDE")
            .with_score("MS:1001171", 42.0)
            .with_score(PSM_Q_VALUE, 0.5);
        assert_eq!(psm.score("MS:1001171"), Some(42.0));
        assert_eq!(psm.score(PSM_Q_VALUE), Some(0.5));
        assert_eq!(psm.score(PSM_FDR_SCORE), None);

        psm.q_value = Some(0.01);
        assert_eq!(psm.score(PSM_Q_VALUE), Some(0.01));

        psm.retain_scores(&["MS:1001171"]);
        assert_eq!(psm.scores.len(), 1);
    }

    #[test]
    fn shared_accessions_serialize() {
        let mut protein = Protein::new("sp|P02768|ALBU_HUMAN");
        protein.description = Some("Albumin".into());
        let json = serde_json::to_string(&protein).unwrap();
        assert!(json.contains("sp|P02768|ALBU_HUMAN"));

        let back: Protein = serde_json::from_str(&json).unwrap();
        assert_eq!(back, protein);
        assert_eq!(back.description.as_deref(), Some("Albumin"));
    }

    #[test]
    fn protein_equality_by_accession() {
        let mut a = Protein::new("sp|P12345|ALBU_HUMAN");
        let b = Protein::new("sp|P12345|ALBU_HUMAN");
        a.decoy = Decoy::Explicit(true);
        a.group = Some(GroupId(3));
        assert_eq!(a, b);
        assert!(a.is_decoy());
        assert!(!b.is_decoy());
        assert_eq!(Decoy::from(None), Decoy::Unset);
        assert_eq!(Decoy::from(Some(false)), Decoy::Explicit(false));
    }
}
