//! Decomposition solvers.
//!
//! External solvers run as child processes that read a graph on stdin and
//! stream improving decompositions on stdout. Output is pumped through a
//! channel by a reader thread so a stalled solver still observes the timer,
//! and the child is killed as soon as its stream is dropped.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::decomposition::Decomposition;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::timer::Timer;

/// Boxed stream of decompositions.
pub type Decompositions<'a> = Box<dyn Iterator<Item = Result<Decomposition>> + 'a>;

/// Parameters passed to a decomposition solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverParams {
    pub seed: u64,
    /// Ask the solver to report every decomposition narrower than this.
    pub print_width_below: usize,
    /// CPU list for `taskset`, if any.
    pub affinity: Option<String>,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            seed: 0,
            print_width_below: 100,
            affinity: None,
        }
    }
}

impl SolverParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_print_width_below(mut self, width: usize) -> Self {
        self.print_width_below = width;
        self
    }

    pub fn with_affinity(mut self, affinity: impl Into<String>) -> Self {
        self.affinity = Some(affinity.into());
        self
    }
}

/// Anything that produces tree decompositions of a graph.
pub trait DecompositionSolver {
    /// Stream decompositions of `graph`, best effort and improving over time.
    fn decompositions<'a>(
        &'a self,
        graph: &Graph,
        params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Decompositions<'a>>;
}

impl<S: DecompositionSolver + ?Sized> DecompositionSolver for Box<S> {
    fn decompositions<'a>(
        &'a self,
        graph: &Graph,
        params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Decompositions<'a>> {
        (**self).decompositions(graph, params, timer)
    }
}

/// Decomposition solver selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    #[default]
    SingleBag,
    Tamaki,
    FlowCutter,
    Htd,
}

impl SolverKind {
    /// Build the solver; `location` overrides the default program path
    /// (the classpath for Tamaki).
    pub fn build(self, location: Option<&str>) -> Box<dyn DecompositionSolver> {
        match self {
            SolverKind::SingleBag => Box::new(SingleBagSolver),
            SolverKind::Tamaki => {
                Box::new(ExternalSolver::tamaki(location.unwrap_or("solvers/TCS-Meiji")))
            }
            SolverKind::FlowCutter => {
                Box::new(ExternalSolver::flow_cutter(location.unwrap_or("flow_cutter_pace17")))
            }
            SolverKind::Htd => Box::new(ExternalSolver::htd(location.unwrap_or("htd_main"))),
        }
    }
}

/// Emits the single decomposition with one bag holding every vertex.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleBagSolver;

impl DecompositionSolver for SingleBagSolver {
    fn decompositions<'a>(
        &'a self,
        graph: &Graph,
        _params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Decompositions<'a>> {
        timer.check()?;
        let mut decomposition = Decomposition::new();
        if graph.num_nodes() > 0 {
            decomposition.add_node((0..graph.num_nodes()).collect::<BTreeSet<_>>());
        }
        Ok(Box::new(std::iter::once(Ok(decomposition))))
    }
}

/// Replays a fixed list of decompositions, checking the timer before each.
#[derive(Debug, Clone, Default)]
pub struct FixedDecompositions(pub Vec<Decomposition>);

impl DecompositionSolver for FixedDecompositions {
    fn decompositions<'a>(
        &'a self,
        _graph: &Graph,
        _params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Decompositions<'a>> {
        Ok(Box::new(self.0.iter().map(move |d| {
            timer.check()?;
            Ok(d.clone())
        })))
    }
}

/// A solver executable driven over the DIMACS protocol.
///
/// Arguments may use the placeholders `{seed}`, `{graph}` (path of the
/// graph file, also piped to stdin) and `{print_width_below}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSolver {
    program: String,
    args: Vec<String>,
}

impl ExternalSolver {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Tamaki's heuristic solver from the given Java classpath.
    pub fn tamaki(classpath: impl Into<String>) -> Self {
        Self::new(
            "java",
            [
                "-classpath".to_string(),
                classpath.into(),
                "-Xss1g".to_string(),
                "tw.heuristic.MainDecomposer".to_string(),
                "-s".to_string(),
                "{seed}".to_string(),
                "-p".to_string(),
                "{print_width_below}".to_string(),
            ],
        )
    }

    /// The FlowCutter PACE 2017 binary.
    pub fn flow_cutter(binary: impl Into<String>) -> Self {
        Self::new(binary, ["-s", "{seed}", "-p", "{print_width_below}"])
    }

    /// The htd binary.
    pub fn htd(binary: impl Into<String>) -> Self {
        Self::new(
            binary,
            [
                "-s",
                "{seed}",
                "--opt",
                "width",
                "--iterations",
                "0",
                "--strategy",
                "challenge",
                "--print-progress",
                "--preprocessing",
                "full",
            ],
        )
    }

    fn command(&self, graph_path: &str, params: &SolverParams) -> Command {
        let fill = |arg: &str| {
            arg.replace("{seed}", &params.seed.to_string())
                .replace("{graph}", graph_path)
                .replace("{print_width_below}", &params.print_width_below.to_string())
        };
        let mut command = match &params.affinity {
            Some(cpus) => {
                let mut c = Command::new("taskset");
                c.arg("-c").arg(cpus).arg(fill(&self.program));
                c
            }
            None => Command::new(fill(&self.program)),
        };
        command.args(self.args.iter().map(|a| fill(a)));
        command
    }
}

impl DecompositionSolver for ExternalSolver {
    fn decompositions<'a>(
        &'a self,
        graph: &Graph,
        params: &SolverParams,
        timer: &'a Timer,
    ) -> Result<Decompositions<'a>> {
        let graph_file = NamedTempFile::new()?;
        graph.write_dimacs(graph_file.as_file())?;
        let graph_path = graph_file.path().to_string_lossy().into_owned();

        let mut command = self.command(&graph_path, params);
        command
            .stdin(Stdio::from(graph_file.reopen()?))
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        debug!(?command, "starting decomposition solver");
        let mut child = command
            .spawn()
            .map_err(|e| Error::Solver(format!("unable to start {}: {e}", self.program)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Solver("solver stdout unavailable".to_string()))?;

        let (sender, receiver) = crossbeam_channel::unbounded();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                if sender.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(DecompositionStream {
            child,
            lines: receiver,
            timer,
            finished: false,
            _graph_file: graph_file,
        }))
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Decompositions parsed from a running solver. Dropping the stream kills
/// the solver.
pub struct DecompositionStream<'a> {
    child: Child,
    lines: Receiver<std::io::Result<String>>,
    timer: &'a Timer,
    finished: bool,
    _graph_file: NamedTempFile,
}

impl DecompositionStream<'_> {
    fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            if let Err(e) = self.timer.check() {
                return Some(Err(e));
            }
            let wait = self
                .timer
                .remaining()
                .map_or(POLL_INTERVAL, |r| r.clamp(Duration::from_millis(1), POLL_INTERVAL));
            match self.lines.recv_timeout(wait) {
                Ok(line) => return Some(line.map_err(Error::from)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

struct StreamLines<'s, 'a>(&'s mut DecompositionStream<'a>);

impl Iterator for StreamLines<'_, '_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Result<String>> {
        self.0.next_line()
    }
}

impl Iterator for DecompositionStream<'_> {
    type Item = Result<Decomposition>;

    fn next(&mut self) -> Option<Result<Decomposition>> {
        if self.finished {
            return None;
        }
        match Decomposition::parse_one(&mut StreamLines(self)) {
            Ok(Some(decomposition)) => Some(Ok(decomposition)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for DecompositionStream<'_> {
    fn drop(&mut self) {
        reap(&mut self.child);
    }
}

/// Kill `child` if it still runs and collect its exit status.
fn reap(child: &mut Child) -> Option<ExitStatus> {
    if let Err(e) = child.kill() {
        if e.kind() != std::io::ErrorKind::InvalidInput {
            warn!(error = %e, "unable to kill decomposition solver");
        }
    }
    match child.wait() {
        Ok(status) => {
            debug!(%status, "decomposition solver exited");
            Some(status)
        }
        Err(e) => {
            warn!(error = %e, "unable to reap decomposition solver");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn path_graph(n: usize) -> Graph {
        let mut graph = Graph::new(n);
        for i in 1..n {
            graph.add_edge(i - 1, i);
        }
        graph
    }

    #[test]
    fn test_single_bag_solver() {
        let timer = Timer::unbounded("planning");
        let solver = SingleBagSolver;
        let all: Vec<_> = solver
            .decompositions(&path_graph(4), &SolverParams::default(), &timer)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].width(), 3);
    }

    #[test]
    fn test_solver_kind_builds_boxed_solvers() {
        let timer = Timer::unbounded("planning");
        let boxed = SolverKind::default().build(None);
        let count = boxed
            .decompositions(&path_graph(3), &SolverParams::default(), &timer)
            .unwrap()
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_command_substitution() {
        let solver = ExternalSolver::flow_cutter("/opt/flow_cutter");
        let params = SolverParams::default().with_seed(42).with_print_width_below(9);
        let command = solver.command("/tmp/g.gr", &params);
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(command.get_program(), "/opt/flow_cutter");
        assert_eq!(args, vec!["-s", "42", "-p", "9"]);

        let pinned = solver.command("/tmp/g.gr", &params.with_affinity("0-3"));
        assert_eq!(pinned.get_program(), "taskset");
    }

    #[cfg(unix)]
    #[test]
    fn test_external_solver_stream() {
        let timer = Timer::unbounded("planning");
        let solver = ExternalSolver::new(
            "sh",
            [
                "-c",
                "head -n 1 {graph} | grep -q '^p tw 3 2$' && printf 'c found\\ns td 1 3 3\\nb 1 1 2 3\\n'",
            ],
        );
        let all: Vec<_> = solver
            .decompositions(&path_graph(3), &SolverParams::default(), &timer)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].width(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_dropping_stream_kills_solver() {
        let timer = Timer::unbounded("planning");
        let solver = ExternalSolver::new("sh", ["-c", "printf 's td 1 1 1\\nb 1 1\\n=\\n'; sleep 30"]);
        let start = Instant::now();
        {
            let mut stream = solver
                .decompositions(&path_graph(1), &SolverParams::default(), &timer)
                .unwrap();
            let first = stream.next().unwrap().unwrap();
            assert_eq!(first.num_nodes(), 1);
        }
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_reap_reports_exit_status() {
        let mut child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        child.wait().unwrap();
        let status = reap(&mut child).unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_solver_times_out() {
        let timer = Timer::new("planning", Some(Duration::from_millis(200)));
        let solver = ExternalSolver::new("sh", ["-c", "sleep 30"]);
        let mut stream = solver
            .decompositions(&path_graph(2), &SolverParams::default(), &timer)
            .unwrap();
        let err = stream.next().unwrap().unwrap_err();
        assert!(err.is_timeout());
        assert!(stream.next().is_none());
    }
}
