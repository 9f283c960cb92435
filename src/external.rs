//! Alternative out-of-process clustering engine.
//!
//! The engine is an external program driven over pipes:
//!
//! ```text
//! $ program <DeltaR> <algorithm number>
//!  **send input file to stdin        ← we write the summary and close stdin
//!  **output file starts here         ← everything after this is the result
//! # DeltaR=0.4 antikt_algorithm ... Columns; pseudojet_id parent_id child1_id child2_id InputIdx
//! 0 5 -1 -1 0
//! ...
//! # PT Rapidity Phi Energy Px Py Pz
//! 12.5 0.31 1.2 13.1 4.5 11.6 4.0
//! ...
//! ```
//!
//! Only the protocol is owned here: writing the input summary, reading the
//! two tables back into [`Node`]s, and synthesising ranks. A run that ends
//! without output is retried with identical input up to [`MAX_ATTEMPTS`]
//! times in total.

use core::fmt;
use core::str::FromStr;
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::cluster::{FloatField, Node};
use crate::error::{Error, Result};
use crate::hierarchy::{split_roots, validate_nodes, MergeTree};
use crate::kinematics::Kinematics;

/// Attempts made before giving up on a silent engine.
pub const MAX_ATTEMPTS: usize = 5;

const SEND_INPUT_PROMPT: &str = "**send input file to stdin";
const OUTPUT_PROMPT: &str = "**output file starts here";

/// Algorithms the external engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalAlgorithm {
    /// `p = 1`
    Kt,
    /// `p = 0`
    Cambridge,
    /// `p = -1`
    AntiKt,
}

impl ExternalAlgorithm {
    /// Algorithm for a pT exponent multiplier; only -1, 0 and 1 exist.
    pub fn from_exponent(exponent_multiplier: f64) -> Result<Self> {
        if exponent_multiplier == 1.0 {
            Ok(ExternalAlgorithm::Kt)
        } else if exponent_multiplier == 0.0 {
            Ok(ExternalAlgorithm::Cambridge)
        } else if exponent_multiplier == -1.0 {
            Ok(ExternalAlgorithm::AntiKt)
        } else {
            Err(Error::InvalidParameter {
                name: "ExponentOfPTMultiplier",
                message: format!("external engine supports -1, 0 or 1, got {exponent_multiplier}"),
            })
        }
    }

    /// The pT exponent multiplier.
    pub fn exponent_multiplier(self) -> f64 {
        match self {
            ExternalAlgorithm::Kt => 1.0,
            ExternalAlgorithm::Cambridge => 0.0,
            ExternalAlgorithm::AntiKt => -1.0,
        }
    }

    /// Number passed on the command line.
    pub fn number(self) -> u8 {
        match self {
            ExternalAlgorithm::Kt => 0,
            ExternalAlgorithm::AntiKt => 1,
            ExternalAlgorithm::Cambridge => 2,
        }
    }

    /// Name written in the output header.
    pub fn name(self) -> &'static str {
        match self {
            ExternalAlgorithm::Kt => "kt_algorithm",
            ExternalAlgorithm::Cambridge => "cambridge_algorithm",
            ExternalAlgorithm::AntiKt => "antikt_algorithm",
        }
    }
}

impl fmt::Display for ExternalAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExternalAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kt_algorithm" => Ok(ExternalAlgorithm::Kt),
            "cambridge_algorithm" => Ok(ExternalAlgorithm::Cambridge),
            "antikt_algorithm" => Ok(ExternalAlgorithm::AntiKt),
            _ => Err(Error::UnknownOption {
                key: "external algorithm",
                value: s.to_string(),
            }),
        }
    }
}

/// Input summary: one `index px py pz energy` line per jet input.
pub fn summary_lines(inputs: &[Kinematics]) -> String {
    let mut out = String::new();
    for (i, k) in inputs.iter().enumerate() {
        out.push_str(&format!("{i} {} {} {} {}\n", k.px, k.py, k.pz, k.energy));
    }
    out
}

/// Parsed result of one external run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalJets {
    /// Radius from the header.
    pub delta_r: f64,
    /// Algorithm from the header.
    pub algorithm: ExternalAlgorithm,
    /// Every node, inputs keeping their input index as id.
    pub nodes: Vec<Node>,
}

impl ExternalJets {
    /// One merge tree per root.
    pub fn split(&self) -> Result<Vec<MergeTree>> {
        split_roots(&self.nodes)
    }
}

const INT_COLUMNS: [&str; 5] = ["pseudojet_id", "parent_id", "child1_id", "child2_id", "InputIdx"];

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        line,
        message: message.into(),
    }
}

/// Parse the engine's output into nodes.
///
/// Rows with `InputIdx = -1` are intermediate clusters and receive fresh
/// ids after the largest input index, in row order. Every input index
/// `0..n_inputs` must appear. With `do_checks`, parent/child reciprocity is
/// validated as well.
pub fn parse_output<S: AsRef<str>>(
    lines: &[S],
    n_inputs: usize,
    do_checks: bool,
) -> Result<ExternalJets> {
    let mut numbered = lines
        .iter()
        .enumerate()
        .map(|(i, l)| (i + 1, l.as_ref().trim()))
        .filter(|(_, l)| !l.is_empty());

    let (header_line, header) = numbered
        .next()
        .ok_or_else(|| parse_error(0, "no output from alternative engine"))?;
    let header: Vec<&str> = header
        .strip_prefix('#')
        .ok_or_else(|| parse_error(header_line, "header must start with '#'"))?
        .split_whitespace()
        .collect();
    let delta_r = header
        .first()
        .and_then(|h| h.strip_prefix("DeltaR="))
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| parse_error(header_line, "missing DeltaR=<r>"))?;
    let algorithm: ExternalAlgorithm = header
        .get(1)
        .ok_or_else(|| parse_error(header_line, "missing algorithm name"))?
        .parse()
        .map_err(|_| parse_error(header_line, "unrecognised algorithm name"))?;
    let columns_at = header
        .iter()
        .position(|h| *h == "Columns;")
        .ok_or_else(|| parse_error(header_line, "missing 'Columns;'"))?;
    let int_names = &header[columns_at + 1..];
    let mut icol = [0usize; 5];
    for (slot, wanted) in icol.iter_mut().zip(INT_COLUMNS) {
        *slot = int_names
            .iter()
            .position(|n| *n == wanted)
            .ok_or_else(|| parse_error(header_line, format!("missing column {wanted}")))?;
    }

    let mut int_rows: Vec<(usize, Vec<i64>)> = Vec::new();
    let mut float_rows: Vec<(usize, Vec<f64>)> = Vec::new();
    let mut float_fields: Option<Vec<FloatField>> = None;
    for (line_no, line) in numbered {
        if let Some(names) = line.strip_prefix('#') {
            if float_fields.is_some() {
                return Err(parse_error(line_no, "more than one float marker line"));
            }
            let fields = names
                .split_whitespace()
                .map(|n| {
                    FloatField::from_column_name(n)
                        .ok_or_else(|| parse_error(line_no, format!("unknown float column {n}")))
                })
                .collect::<Result<Vec<_>>>()?;
            float_fields = Some(fields);
            continue;
        }
        match &float_fields {
            None => {
                let row = line
                    .split_whitespace()
                    .map(|v| v.parse::<i64>().map_err(|_| parse_error(line_no, "bad integer")))
                    .collect::<Result<Vec<_>>>()?;
                if row.len() != int_names.len() {
                    return Err(parse_error(line_no, "wrong number of integer columns"));
                }
                int_rows.push((line_no, row));
            }
            Some(fields) => {
                let row = line
                    .split_whitespace()
                    .map(|v| v.parse::<f64>().map_err(|_| parse_error(line_no, "bad float")))
                    .collect::<Result<Vec<_>>>()?;
                if row.len() != fields.len() {
                    return Err(parse_error(line_no, "wrong number of float columns"));
                }
                float_rows.push((line_no, row));
            }
        }
    }
    let float_fields = float_fields.unwrap_or_default();
    if int_rows.len() != float_rows.len() {
        return Err(parse_error(
            0,
            format!("{} integer rows but {} float rows", int_rows.len(), float_rows.len()),
        ));
    }

    let [pid, parent_col, c1_col, c2_col, input_col] = icol;
    let max_input = int_rows.iter().map(|(_, r)| r[input_col]).max().unwrap_or(-1).max(-1);
    for i in 0..n_inputs as i64 {
        if !int_rows.iter().any(|(_, r)| r[input_col] == i) {
            return Err(parse_error(0, format!("input {i} missing from output")));
        }
    }

    let mut next_free = (max_input + 1) as usize;
    let mut ids: HashMap<i64, usize> = HashMap::with_capacity(int_rows.len());
    for (line_no, row) in &int_rows {
        let id = match row[input_col] {
            -1 => {
                next_free += 1;
                next_free - 1
            }
            i if i >= 0 => i as usize,
            _ => return Err(parse_error(*line_no, "negative InputIdx")),
        };
        if ids.insert(row[pid], id).is_some() {
            return Err(parse_error(*line_no, "duplicate pseudojet_id"));
        }
    }
    let remap = |line_no: usize, raw: i64| -> Result<Option<usize>> {
        if raw == -1 {
            return Ok(None);
        }
        ids.get(&raw)
            .copied()
            .map(Some)
            .ok_or_else(|| parse_error(line_no, format!("unknown pseudojet_id {raw}")))
    };

    let mut nodes = Vec::with_capacity(int_rows.len());
    for ((line_no, ints), (_, floats)) in int_rows.iter().zip(&float_rows) {
        let id = remap(*line_no, ints[pid])?
            .ok_or_else(|| parse_error(*line_no, "pseudojet_id of -1"))?;
        let children = match (remap(*line_no, ints[c1_col])?, remap(*line_no, ints[c2_col])?) {
            (None, None) => None,
            (Some(a), Some(b)) => Some((a, b)),
            _ => return Err(parse_error(*line_no, "node has only one child")),
        };
        let mut node = Node::leaf(id, Kinematics::default());
        node.parent = remap(*line_no, ints[parent_col])?;
        node.children = children;
        for (field, value) in float_fields.iter().zip(floats) {
            let k = &mut node.kinematics;
            match field {
                FloatField::Pt => k.pt = *value,
                FloatField::Rapidity => k.rapidity = *value,
                FloatField::Phi => k.phi = *value,
                FloatField::Energy => k.energy = *value,
                FloatField::Px => k.px = *value,
                FloatField::Py => k.py = *value,
                FloatField::Pz => k.pz = *value,
                FloatField::JoinDistance => node.join_distance = *value,
            }
        }
        nodes.push(node);
    }
    synthesise_ranks(&mut nodes)?;

    if do_checks {
        let report = validate_nodes(&nodes);
        if !report.is_healthy() {
            return Err(parse_error(0, report.to_string()));
        }
    }
    Ok(ExternalJets {
        delta_r,
        algorithm,
        nodes,
    })
}

/// Leaves get rank 0; a node is ranked once both children are, at `max + 1`.
fn synthesise_ranks(nodes: &mut [Node]) -> Result<()> {
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut waiting = vec![0usize; nodes.len()];
    for (p, node) in nodes.iter().enumerate() {
        if let Some((a, b)) = node.children {
            dependents.entry(a).or_default().push(p);
            dependents.entry(b).or_default().push(p);
            waiting[p] = 2;
        }
    }
    let position: HashMap<usize, usize> =
        nodes.iter().enumerate().map(|(p, n)| (n.id, p)).collect();
    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&p| waiting[p] == 0).collect();
    let mut ranked = 0;
    while let Some(p) = queue.pop_front() {
        ranked += 1;
        nodes[p].rank = match nodes[p].children {
            None => 0,
            Some((a, b)) => {
                let rank_of = |id| position.get(&id).map_or(0, |&q| nodes[q].rank);
                rank_of(a).max(rank_of(b)) + 1
            }
        };
        for &q in dependents.get(&nodes[p].id).map_or(&[][..], Vec::as_slice) {
            waiting[q] -= 1;
            if waiting[q] == 0 {
                queue.push_back(q);
            }
        }
    }
    if ranked != nodes.len() {
        return Err(parse_error(
            0,
            format!("{} nodes could not be ranked from the leaves", nodes.len() - ranked),
        ));
    }
    Ok(())
}

/// Call `attempt` until it yields output, at most `max_attempts` times.
pub fn with_retries<F>(max_attempts: usize, mut attempt: F) -> Result<Vec<String>>
where
    F: FnMut(usize) -> Result<Option<Vec<String>>>,
{
    for n in 1..=max_attempts {
        if let Some(lines) = attempt(n)? {
            return Ok(lines);
        }
        tracing::warn!(attempt = n, max_attempts, "no output from alternative engine, retrying");
    }
    Err(Error::SubprocessFailure {
        attempts: max_attempts,
    })
}

/// Runner for the external program.
#[derive(Debug, Clone)]
pub struct ExternalEngine {
    program: PathBuf,
    max_attempts: usize,
    do_checks: bool,
}

impl ExternalEngine {
    /// Runner for the program at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            max_attempts: MAX_ATTEMPTS,
            do_checks: false,
        }
    }

    /// Change the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Validate parent/child reciprocity of every result.
    pub fn with_checks(mut self, do_checks: bool) -> Self {
        self.do_checks = do_checks;
        self
    }

    /// Cluster `inputs` with the external program.
    pub fn run(
        &self,
        delta_r: f64,
        algorithm: ExternalAlgorithm,
        inputs: &[Kinematics],
    ) -> Result<ExternalJets> {
        let args = [delta_r.to_string(), algorithm.number().to_string()];
        let summary = summary_lines(inputs);
        let lines = with_retries(self.max_attempts, |n| {
            tracing::debug!(attempt = n, program = %self.program.display(), "running alternative engine");
            self.attempt(&args, &summary)
        })?;
        parse_output(&lines, inputs.len(), self.do_checks)
    }

    fn attempt(&self, args: &[String], input: &str) -> Result<Option<Vec<String>>> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let mut stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Io("child stdout was not captured".to_string()))?;
        let mut reader = BufReader::new(stdout);
        let mut output = None;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            // every prompt starts with " *"
            if !line.starts_with(" *") {
                continue;
            }
            if line.contains(SEND_INPUT_PROMPT) {
                if let Some(mut pipe) = stdin.take() {
                    pipe.write_all(input.as_bytes())?;
                    pipe.flush()?;
                }
            } else if line.contains(OUTPUT_PROMPT) {
                let rest = reader.lines().collect::<std::io::Result<Vec<_>>>()?;
                output = Some(rest);
                break;
            }
        }
        drop(stdin);
        let _ = child.wait()?;
        Ok(output.filter(|lines| lines.iter().any(|l| !l.trim().is_empty())))
    }
}
