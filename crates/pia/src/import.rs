//! Sources of PSM evidence
//!
//! An [`EvidenceSource`] feeds [`EvidenceRecord`]s into a
//! [`StructureBuilder`], which admits them through the import filters.

use crate::builder::StructureBuilder;
use crate::evidence::{Decoy, FileId, Modification, Protein, Psm};
use crate::filter::FilterChain;
use crate::{Error, Result};
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;

/// One PSM together with the proteins its peptide maps to
#[derive(Clone, Debug, PartialEq)]
pub struct EvidenceRecord {
    pub psm: Psm,
    pub proteins: Vec<Protein>,
}

pub trait EvidenceSource {
    fn name(&self) -> &str;

    /// Feed every record into `builder`, tagging PSMs with `file`. Returns
    /// the number of admitted PSMs.
    fn import(
        &mut self,
        file: FileId,
        builder: &mut StructureBuilder,
        filters: &FilterChain,
        retained_scores: Option<&[String]>,
    ) -> Result<usize>;
}

/// Evidence held in memory
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    name: String,
    records: Vec<EvidenceRecord>,
}

impl MemorySource {
    pub fn new<S: Into<String>>(name: S, records: Vec<EvidenceRecord>) -> Self {
        MemorySource {
            name: name.into(),
            records,
        }
    }
}

impl EvidenceSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn import(
        &mut self,
        file: FileId,
        builder: &mut StructureBuilder,
        filters: &FilterChain,
        retained_scores: Option<&[String]>,
    ) -> Result<usize> {
        let mut admitted = 0;
        for mut record in std::mem::take(&mut self.records) {
            record.psm.file = file;
            if builder.add_evidence(record, filters, retained_scores) {
                admitted += 1;
            }
        }
        Ok(admitted)
    }
}

/// A tab-separated PSM table with a header line.
///
/// Recognized columns (aliases used by sage's `results.sage.tsv` in
/// parentheses):
/// - `psm_id` (`scannr`), `spectrum` (`scannr`), `sequence` (`peptide`),
///   `charge`, `proteins` (`;`-separated): required
/// - `decoy` (`true`/`false`), or `label` (`-1` marks a decoy): optional,
///   sets the decoy flag of the row's proteins
/// - `rt`, `mz` (`expmass`), `calcmass`, `modifications`: optional
///
/// Every other column with a numeric value is a score named by its header.
/// Modifications are either given as `position:mass_shift[:residue]` entries
/// separated by `;`, or inline in the sequence, as in `PEPM[+15.9949]K`.
#[derive(Clone, Debug)]
pub struct TabularSource {
    path: PathBuf,
    name: String,
}

impl TabularSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        TabularSource { path, name }
    }

    pub fn read<R: std::io::Read>(rdr: R) -> Result<Vec<EvidenceRecord>> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(false)
            .from_reader(rdr);
        let columns = Columns::new(rdr.headers()?)?;
        let mut records = Vec::new();
        for (line, row) in rdr.records().enumerate() {
            let row = row?;
            records.push(
                columns
                    .parse(&row)
                    .map_err(|e| Error::InvalidTable(format!("line {}: {}", line + 2, e)))?,
            );
        }
        Ok(records)
    }
}

impl EvidenceSource for TabularSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn import(
        &mut self,
        file: FileId,
        builder: &mut StructureBuilder,
        filters: &FilterChain,
        retained_scores: Option<&[String]>,
    ) -> Result<usize> {
        let start = Instant::now();
        let records = Self::read(std::fs::File::open(&self.path)?)?;
        let total = records.len();
        let mut source = MemorySource::new(self.name.clone(), records);
        let admitted = source.import(file, builder, filters, retained_scores)?;
        info!(
            "imported {}/{} PSMs from {} in {}ms",
            admitted,
            total,
            self.path.display(),
            start.elapsed().as_millis()
        );
        Ok(admitted)
    }
}

struct Columns {
    psm_id: usize,
    spectrum: usize,
    sequence: usize,
    charge: usize,
    proteins: usize,
    decoy: Option<usize>,
    label: Option<usize>,
    rt: Option<usize>,
    mz: Option<usize>,
    calcmass: Option<usize>,
    modifications: Option<usize>,
    scores: Vec<(usize, String)>,
}

impl Columns {
    fn new(headers: &csv::StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| headers.iter().position(|h| h == *name))
        };
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| {
                Error::InvalidTable(format!("missing column `{}`", names.join("` or `")))
            })
        };

        let columns = Columns {
            psm_id: require(&["psm_id", "scannr"])?,
            spectrum: require(&["spectrum", "scannr"])?,
            sequence: require(&["sequence", "peptide"])?,
            charge: require(&["charge"])?,
            proteins: require(&["proteins"])?,
            decoy: find(&["decoy"]),
            label: find(&["label"]),
            rt: find(&["rt"]),
            mz: find(&["mz", "expmass"]),
            calcmass: find(&["calcmass"]),
            modifications: find(&["modifications"]),
            scores: Vec::new(),
        };
        let known = [
            Some(columns.psm_id),
            Some(columns.spectrum),
            Some(columns.sequence),
            Some(columns.charge),
            Some(columns.proteins),
            columns.decoy,
            columns.label,
            columns.rt,
            columns.mz,
            columns.calcmass,
            columns.modifications,
        ];
        let scores = headers
            .iter()
            .enumerate()
            .filter(|(ix, _)| !known.contains(&Some(*ix)))
            .map(|(ix, name)| (ix, name.to_string()))
            .collect::<Vec<_>>();
        debug!(
            "score columns: {:?}",
            scores.iter().map(|(_, name)| name).collect::<Vec<_>>()
        );
        Ok(Columns { scores, ..columns })
    }

    fn parse(&self, row: &csv::StringRecord) -> std::result::Result<EvidenceRecord, String> {
        let get = |ix: usize| row.get(ix).unwrap_or_default().trim();
        let optional = |ix: Option<usize>| ix.map(get).filter(|s| !s.is_empty());
        let number = |ix: Option<usize>| -> std::result::Result<Option<f64>, String> {
            optional(ix)
                .map(|s| s.parse::<f64>().map_err(|_| format!("`{}` is not a number", s)))
                .transpose()
        };

        let (sequence, mut modifications) = parse_sequence(get(self.sequence))?;
        if let Some(mods) = optional(self.modifications) {
            modifications.extend(parse_modifications(mods)?);
        }

        let mut psm = Psm::new(FileId::default(), get(self.psm_id), sequence.as_str());
        psm.spectrum = get(self.spectrum).to_string();
        psm.charge = get(self.charge)
            .parse()
            .map_err(|_| format!("invalid charge `{}`", get(self.charge)))?;
        psm.modifications = modifications;
        psm.rt = number(self.rt)?;
        psm.experimental_mz = number(self.mz)?;
        psm.theoretical_mass = number(self.calcmass)?;
        for (ix, name) in &self.scores {
            // non-numeric columns are not scores
            if let Some(Ok(value)) = optional(Some(*ix)).map(str::parse::<f64>) {
                psm.scores.insert(name.clone(), value);
            }
        }

        let decoy = match (optional(self.decoy), optional(self.label)) {
            (Some(decoy), _) => Decoy::Explicit(matches!(decoy, "true" | "TRUE" | "True" | "1")),
            (None, Some(label)) => Decoy::Explicit(label == "-1"),
            (None, None) => Decoy::Unset,
        };
        let proteins = get(self.proteins)
            .split(';')
            .map(str::trim)
            .filter(|acc| !acc.is_empty())
            .map(|acc| {
                let mut protein = Protein::new(acc);
                protein.decoy = decoy;
                protein
            })
            .collect();

        Ok(EvidenceRecord { psm, proteins })
    }
}

/// Split a sequence with inline modifications (`[+42.0106]-PEPM[+15.9949]K`)
/// into the bare sequence and its modifications
fn parse_sequence(s: &str) -> std::result::Result<(String, Vec<Modification>), String> {
    let mut sequence = String::with_capacity(s.len());
    let mut modifications = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                let mass = chars.by_ref().take_while(|c| *c != ']').collect::<String>();
                let mass_shift = mass
                    .parse::<f64>()
                    .map_err(|_| format!("invalid modification `[{}]` in `{}`", mass, s))?;
                modifications.push(Modification {
                    position: sequence.len() as u32,
                    mass_shift,
                    residue: sequence.chars().last(),
                });
                // N-terminal modifications are separated by a dash
                if sequence.is_empty() && chars.peek() == Some(&'-') {
                    chars.next();
                }
            }
            '-' if chars.peek().is_none() => {}
            c if c.is_ascii_alphabetic() => sequence.push(c),
            _ => return Err(format!("invalid character `{}` in `{}`", c, s)),
        }
    }
    Ok((sequence, modifications))
}

fn parse_modifications(s: &str) -> std::result::Result<Vec<Modification>, String> {
    s.split(';')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| {
            let mut fields = m.split(':');
            let position = fields.next().and_then(|p| p.parse().ok());
            let mass_shift = fields.next().and_then(|p| p.parse().ok());
            let residue = fields.next().and_then(|r| r.chars().next());
            match (position, mass_shift) {
                (Some(position), Some(mass_shift)) => Ok(Modification {
                    position,
                    mass_shift,
                    residue,
                }),
                _ => Err(format!("invalid modification `{}`", m)),
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const TABLE: &str = "psm_id\tspectrum\tsequence\tcharge\tproteins\tdecoy\trt\tMS:1001171\tnote
1\tscan=10\tPEPTIDE\t2\tsp|A;sp|B\tfalse\t12.5\t33.1\tok
2\tscan=11\tPEPM[+15.9949]K\t3\tDECOY_sp|A\ttrue\t\t12.0\t
";

    #[test]
    fn read_table() {
        let records = TabularSource::read(TABLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.psm.id, "1");
        assert_eq!(first.psm.spectrum, "scan=10");
        assert_eq!(first.psm.charge, 2);
        assert_eq!(first.psm.rt, Some(12.5));
        assert_eq!(first.psm.score("MS:1001171"), Some(33.1));
        assert_eq!(first.psm.scores.len(), 1);
        assert_eq!(first.proteins.len(), 2);
        assert_eq!(first.proteins[1].accession.as_ref(), "sp|B");
        assert_eq!(first.proteins[0].decoy, Decoy::Explicit(false));

        let second = &records[1];
        assert_eq!(second.psm.sequence, "PEPMK");
        assert_eq!(second.psm.rt, None);
        assert_eq!(second.psm.modifications.len(), 1);
        assert_eq!(second.psm.modifications[0].position, 4);
        assert_eq!(second.psm.modifications[0].residue, Some('M'));
        assert!(second.proteins[0].is_decoy());
    }

    #[test]
    fn sage_results_columns() {
        let table = "peptide\tproteins\tscannr\tlabel\tcharge\texpmass\thyperscore
[+42.0106]-PEPTIDE\tsp|A\tcontroller=0 scan=7\t-1\t2\t799.36\t41.2
";
        let records = TabularSource::read(table.as_bytes()).unwrap();
        let psm = &records[0].psm;
        assert_eq!(psm.sequence, "PEPTIDE");
        assert_eq!(psm.modifications[0].position, 0);
        assert_eq!(psm.modifications[0].residue, None);
        assert_eq!(psm.experimental_mz, Some(799.36));
        assert_eq!(psm.score("hyperscore"), Some(41.2));
        assert!(records[0].proteins[0].is_decoy());
    }

    #[test]
    fn missing_columns_and_bad_rows() {
        let err = TabularSource::read("psm_id\tsequence\n1\tPEPTIDE\n".as_bytes());
        assert!(matches!(err, Err(Error::InvalidTable(msg)) if msg.contains("spectrum")));

        let bad = "psm_id\tspectrum\tsequence\tcharge\tproteins\n1\ts\tPEPTIDE\ttwo\tA\n";
        assert!(matches!(
            TabularSource::read(bad.as_bytes()),
            Err(Error::InvalidTable(msg)) if msg.starts_with("line 2")
        ));
    }

    #[test]
    fn explicit_modifications() {
        let mods = parse_modifications("4:15.9949:M; 0:42.0106").unwrap();
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[1].residue, None);
        assert!(parse_modifications("4").is_err());
    }

    #[test]
    fn memory_source_tags_file() {
        let record = EvidenceRecord {
            psm: Psm::new(FileId(0), "1", "PEPTIDE"),
            proteins: vec![Protein::new("A")],
        };
        let mut source = MemorySource::new("mem", vec![record]);
        let mut builder = StructureBuilder::default();
        let admitted = source
            .import(FileId(7), &mut builder, &FilterChain::default(), None)
            .unwrap();
        assert_eq!(admitted, 1);
        let structure = builder.build(1).unwrap();
        assert_eq!(structure.all_psms()[0].file, FileId(7));
    }
}
