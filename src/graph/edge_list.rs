//! LGL edge-list format — the persisted form of a [`LocalGraph`].
//!
//! ```text
//! # 61
//! 30 17
//! 1297 36
//!
//! # 60
//! 30 17
//! ```
//!
//! Each block starts with `# <node>` and lists `<neighbour> <weight>` lines
//! for edges leaving that node. Blank lines separate blocks.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use hashbrown::{HashMap, HashSet};
use tracing::info;

use super::LocalGraph;
use crate::model::EntityId;
use crate::{Error, Result};

/// Parse an edge list into a graph.
pub fn read_edge_list<R: BufRead>(reader: R) -> Result<LocalGraph> {
    let mut graph = LocalGraph::new();
    let mut current: Option<u64> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('#') {
            let name = parse_node(header.trim(), line_no)?;
            graph.add_node(name);
            current = Some(name);
            continue;
        }

        let source = current.ok_or_else(|| Error::EdgeListParse {
            line: line_no,
            message: "edge before any `# <node>` header".into(),
        })?;

        let mut fields = line.split_whitespace();
        let (Some(target), Some(weight), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(Error::EdgeListParse {
                line: line_no,
                message: format!("expected `<neighbour> <weight>`, got {line:?}"),
            });
        };
        let target = parse_node(target, line_no)?;
        let weight: i64 = weight.parse().map_err(|_| Error::EdgeListParse {
            line: line_no,
            message: format!("invalid weight {weight:?}"),
        })?;
        graph.add_edge(source, target, weight);
    }

    Ok(graph)
}

/// Load an edge-list file.
pub fn load_edge_list(path: impl AsRef<Path>) -> Result<LocalGraph> {
    let path = path.as_ref();
    let graph = read_edge_list(BufReader::new(File::open(path)?))?;
    info!(
        path = %path.display(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Loaded edge list"
    );
    Ok(graph)
}

/// Write a graph in edge-list form. Nodes without outgoing edges are omitted.
pub fn write_edge_list(graph: &LocalGraph, writer: &mut dyn Write) -> Result<()> {
    let mut first = true;
    for (name, edges) in graph.outgoing_by_node() {
        if edges.is_empty() {
            continue;
        }
        if !first {
            writeln!(writer)?;
        }
        first = false;
        writeln!(writer, "# {name}")?;
        for edge in edges {
            writeln!(writer, "{} {}", graph.name(edge.target), edge.weight)?;
        }
    }
    Ok(())
}

/// Counts reported by [`triples_to_edge_list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub triples: usize,
    pub nodes: usize,
    pub edges: usize,
}

/// Convert `subject property object` triples (one per line, ids with or
/// without their `Q`/`P` prefix) into the edge-list format.
///
/// Edges are grouped under their subject in first-seen order; duplicate
/// triples are written once.
pub fn triples_to_edge_list<R: BufRead>(reader: R, writer: &mut dyn Write) -> Result<ConversionStats> {
    let mut order: Vec<u64> = Vec::new();
    let mut blocks: HashMap<u64, Vec<(u64, i64)>> = HashMap::new();
    let mut seen: HashSet<(u64, u64, i64)> = HashSet::new();
    let mut stats = ConversionStats::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(s), Some(p), Some(o), None) = (fields.next(), fields.next(), fields.next(), fields.next()) else {
            return Err(Error::EdgeListParse {
                line: line_no,
                message: format!("expected `<subject> <property> <object>`, got {line:?}"),
            });
        };
        let subject = parse_node(s, line_no)?;
        let property = parse_node(p, line_no)? as i64;
        let object = parse_node(o, line_no)?;
        stats.triples += 1;

        if !seen.insert((subject, object, property)) {
            continue;
        }
        blocks
            .entry(subject)
            .or_insert_with(|| {
                order.push(subject);
                Vec::new()
            })
            .push((object, property));
    }

    for (i, subject) in order.iter().enumerate() {
        if i > 0 {
            writeln!(writer)?;
        }
        writeln!(writer, "# {subject}")?;
        for (object, property) in &blocks[subject] {
            writeln!(writer, "{object} {property}")?;
            stats.edges += 1;
        }
    }
    stats.nodes = order.len();

    Ok(stats)
}

/// Accept `61` as well as `Q61` / `P17`.
fn parse_node(token: &str, line: usize) -> Result<u64> {
    if token.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return token
            .parse::<EntityId>()
            .map(|id| id.number)
            .map_err(|e| Error::EdgeListParse { line, message: e.to_string() });
    }
    token.parse().map_err(|_| Error::EdgeListParse {
        line,
        message: format!("invalid node id {token:?}"),
    })
}
