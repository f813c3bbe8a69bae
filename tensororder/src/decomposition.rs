//! Tree decompositions read from solver output.
//!
//! Nodes live in an arena addressed by index with a separate adjacency
//! table, so construction algorithms can grow the tree while holding plain
//! indices into it.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use rand::Rng;
use tracing::info;

use crate::error::{Error, Result};
use crate::graph::Graph;

/// A tree whose nodes carry bags of graph vertices (0-based).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decomposition {
    bags: Vec<BTreeSet<usize>>,
    adjacency: Vec<BTreeSet<usize>>,
}

impl Decomposition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node holding `bag`.
    pub fn add_node(&mut self, bag: BTreeSet<usize>) -> usize {
        self.bags.push(bag);
        self.adjacency.push(BTreeSet::new());
        self.bags.len() - 1
    }

    pub fn add_edge(&mut self, a: usize, b: usize) {
        self.adjacency[a].insert(b);
        self.adjacency[b].insert(a);
    }

    fn remove_edge(&mut self, a: usize, b: usize) {
        self.adjacency[a].remove(&b);
        self.adjacency[b].remove(&a);
    }

    pub fn num_nodes(&self) -> usize {
        self.bags.len()
    }

    pub fn num_edges(&self) -> usize {
        self.adjacency.iter().map(BTreeSet::len).sum::<usize>() / 2
    }

    pub fn bag(&self, node: usize) -> &BTreeSet<usize> {
        &self.bags[node]
    }

    pub fn bags(&self) -> impl Iterator<Item = &BTreeSet<usize>> {
        self.bags.iter()
    }

    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency[node].iter().copied()
    }

    pub fn degree(&self, node: usize) -> usize {
        self.adjacency[node].len()
    }

    pub fn max_degree(&self) -> usize {
        self.adjacency.iter().map(BTreeSet::len).max().unwrap_or(0)
    }

    /// Largest bag size minus one.
    pub fn width(&self) -> usize {
        self.bags
            .iter()
            .map(BTreeSet::len)
            .max()
            .unwrap_or(0)
            .saturating_sub(1)
    }

    /// The tree as a plain graph on node indices.
    pub fn to_graph(&self) -> Graph {
        let mut graph = Graph::new(self.num_nodes());
        for (a, neighbors) in self.adjacency.iter().enumerate() {
            for &b in neighbors.range(a + 1..) {
                graph.add_edge(a, b);
            }
        }
        graph
    }

    /// Connected and acyclic. The empty decomposition counts as a tree.
    pub fn is_tree(&self) -> bool {
        let n = self.num_nodes();
        if n == 0 {
            return true;
        }
        let graph = self.to_graph();
        graph.num_edges() == n - 1 && graph.num_components() == 1
    }

    /// Reduce the tree bottom-up from `root`.
    ///
    /// Non-root nodes of degree 1 are leaves and receive no children; every
    /// other node receives the results of its neighbors other than its
    /// parent, in neighbor order. Uses an explicit stack, so depth is bounded
    /// only by memory.
    pub fn traverse_postorder<T, F>(&self, root: usize, mut reduce: F) -> T
    where
        F: FnMut(usize, Vec<T>) -> T,
    {
        assert!(root < self.num_nodes(), "root {root} is not a decomposition node");
        let mut results: HashMap<usize, T> = HashMap::new();
        let mut stack: Vec<(usize, Option<usize>, bool)> = vec![(root, None, false)];
        while let Some((node, parent, expanded)) = stack.pop() {
            if node != root && self.degree(node) == 1 {
                let value = reduce(node, Vec::new());
                results.insert(node, value);
            } else if expanded {
                let children: Vec<T> = self
                    .neighbors(node)
                    .filter(|&n| Some(n) != parent)
                    .filter_map(|n| results.remove(&n))
                    .collect();
                let value = reduce(node, children);
                results.insert(node, value);
            } else {
                stack.push((node, parent, true));
                for child in self.adjacency[node].iter().rev() {
                    if Some(*child) != parent {
                        stack.push((*child, Some(node), false));
                    }
                }
            }
        }
        match results.remove(&root) {
            Some(value) => value,
            None => unreachable!("the root is reduced last"),
        }
    }

    /// Attach a new leaf next to `node` and return it.
    ///
    /// A degree-0 node gets the leaf directly. Otherwise a new internal node
    /// with the bag of `node` is spliced between `node` and one of its
    /// neighbors, and the leaf hangs off that internal node. The leaf bag
    /// defaults to the bag of `node` and must be a subset of it.
    pub fn extend_leaf(&mut self, node: usize, bag: Option<BTreeSet<usize>>) -> usize {
        let bag = match bag {
            Some(bag) => {
                assert!(bag.is_subset(&self.bags[node]), "leaf bag must be a subset");
                bag
            }
            None => self.bags[node].clone(),
        };
        let leaf = self.add_node(bag);
        match self.adjacency[node].iter().next().copied() {
            None => self.add_edge(node, leaf),
            Some(neighbor) => {
                let internal = self.add_node(self.bags[node].clone());
                self.remove_edge(node, neighbor);
                self.add_edge(internal, node);
                self.add_edge(internal, neighbor);
                self.add_edge(internal, leaf);
            }
        }
        leaf
    }

    /// Bound every node to degree 3 by moving random pairs of neighbors
    /// under new internal nodes with the same bag.
    pub fn split_high_degree_nodes<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for node in 0..self.num_nodes() {
            while self.degree(node) > 3 {
                let neighbors: Vec<usize> = self.neighbors(node).collect();
                let picked = rand::seq::index::sample(rng, neighbors.len(), 2);
                let (a, b) = (neighbors[picked.index(0)], neighbors[picked.index(1)]);
                self.remove_edge(node, a);
                self.remove_edge(node, b);
                let internal = self.add_node(self.bags[node].clone());
                self.add_edge(internal, node);
                self.add_edge(internal, a);
                self.add_edge(internal, b);
            }
        }
    }

    /// Write in the `s td` format with 1-indexed bags and vertices.
    pub fn write<W: Write>(&self, mut out: W) -> io::Result<()> {
        let max_vertex = self
            .bags
            .iter()
            .filter_map(|bag| bag.iter().next_back())
            .max()
            .map_or(0, |v| v + 1);
        writeln!(
            out,
            "s td {} {} {}",
            self.num_nodes(),
            self.width() + 1,
            max_vertex
        )?;
        for (i, bag) in self.bags.iter().enumerate() {
            write!(out, "b {}", i + 1)?;
            for v in bag {
                write!(out, " {}", v + 1)?;
            }
            writeln!(out)?;
        }
        for (a, neighbors) in self.adjacency.iter().enumerate() {
            for &b in neighbors.iter().filter(|&&b| b > a) {
                writeln!(out, "{} {}", a + 1, b + 1)?;
            }
        }
        out.flush()
    }

    /// Read the next decomposition from a line stream.
    ///
    /// Returns `Ok(None)` when the stream ends before a header. The
    /// decomposition ends at the end of the stream or at a line starting
    /// with `=`. Comment lines are logged and skipped.
    pub fn parse_one<I>(lines: &mut I) -> Result<Option<Decomposition>>
    where
        I: Iterator<Item = Result<String>>,
    {
        let mut reader = LineReader { lines, number: 0 };

        let Some(header) = reader.next_data(&['c', 'O', '='])? else {
            return Ok(None);
        };
        let header = header.parts;
        if header.first().map(String::as_str) != Some("s") {
            return Err(Error::malformed(reader.number, "expected an `s` header"));
        }
        match header.get(1).map(String::as_str) {
            Some("td") => {}
            Some("bd") => {
                return Err(Error::malformed(
                    reader.number,
                    "branch decompositions are not supported",
                ))
            }
            _ => return Err(Error::malformed(reader.number, "unknown decomposition header")),
        }
        if header.len() != 5 {
            return Err(Error::malformed(reader.number, "incorrect header"));
        }
        let num_bags = reader.number_at(&header[2])?;
        let max_bag = reader.number_at(&header[3])?;
        let num_vertices = reader.number_at(&header[4])?;

        let mut result = Decomposition::new();
        let mut ids: HashMap<usize, usize> = HashMap::new();
        for _ in 0..num_bags {
            let line = reader
                .next_data(&['c', 'O'])?
                .ok_or_else(|| Error::malformed(reader.number, "expected more bags"))?;
            if line.parts[0] != "b" || line.parts.len() < 2 {
                return Err(Error::malformed(reader.number, "expected a bag line"));
            }
            let id = reader.number_at(&line.parts[1])?;
            let mut bag = BTreeSet::new();
            for member in &line.parts[2..] {
                let member = reader.number_at(member)?;
                if member == 0 || member > num_vertices {
                    return Err(Error::malformed(
                        reader.number,
                        format!("unknown node {member}"),
                    ));
                }
                bag.insert(member - 1);
            }
            if bag.len() > max_bag {
                return Err(Error::malformed(
                    reader.number,
                    format!("bag {id} has {} members but max bag size is {max_bag}", bag.len()),
                ));
            }
            if ids.insert(id, result.add_node(bag)).is_some() {
                return Err(Error::malformed(reader.number, format!("duplicate bag {id}")));
            }
        }

        while let Some(line) = reader.next_data(&['c', 'O'])? {
            if line.parts[0].starts_with('=') {
                break;
            }
            if line.parts.len() != 2 {
                return Err(Error::malformed(reader.number, "invalid tree edge line"));
            }
            let endpoint = |raw: &str| -> Result<usize> {
                let id = reader.number_at(raw)?;
                ids.get(&id).copied().ok_or_else(|| {
                    Error::malformed(reader.number, format!("unknown bag {id}"))
                })
            };
            let a = endpoint(&line.parts[0])?;
            let b = endpoint(&line.parts[1])?;
            if a == b {
                return Err(Error::NotATree);
            }
            result.add_edge(a, b);
        }

        if !result.is_tree() {
            return Err(Error::NotATree);
        }
        Ok(Some(result))
    }

    /// Read the first decomposition from a file, which must contain one.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Decomposition> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines().map(|l| l.map_err(Error::from));
        Decomposition::parse_one(&mut lines)?.ok_or_else(|| Error::malformed(0, "no header"))
    }

    /// Parse a decomposition from a string.
    pub fn parse_str(text: &str) -> Result<Decomposition> {
        let mut lines = text.lines().map(|l| Ok(l.to_string()));
        Decomposition::parse_one(&mut lines)?.ok_or_else(|| Error::malformed(0, "no header"))
    }
}

struct DataLine {
    parts: Vec<String>,
}

struct LineReader<'a, I> {
    lines: &'a mut I,
    number: usize,
}

impl<I: Iterator<Item = Result<String>>> LineReader<'_, I> {
    /// Next non-blank line whose first character is not a comment prefix.
    fn next_data(&mut self, comment_prefixes: &[char]) -> Result<Option<DataLine>> {
        for line in self.lines.by_ref() {
            let line = line?;
            self.number += 1;
            let trimmed = line.trim();
            match trimmed.chars().next() {
                None => continue,
                Some(c) if comment_prefixes.contains(&c) => {
                    info!(target: "tensororder::solver", "{trimmed}");
                    continue;
                }
                Some(_) => {
                    return Ok(Some(DataLine {
                        parts: trimmed.split_whitespace().map(str::to_string).collect(),
                    }))
                }
            }
        }
        Ok(None)
    }

    fn number_at(&self, raw: &str) -> Result<usize> {
        raw.parse()
            .map_err(|_| Error::malformed(self.number, format!("expected a number, found `{raw}`")))
    }
}
