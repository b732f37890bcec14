//! UCI engine oracle.
//!
//! Every contest gets its own engine process. The oracle keeps the move list
//! and sends the full position before each search, so the engine itself
//! holds no state we depend on between requests.

use async_trait::async_trait;
use rookery_env::{EnvError, GameId, Move, MoveOutcome, Oracle, OracleFactory, Telemetry, ThinkBudget};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Floor for `go movetime`, so a zero budget still searches.
const MIN_MOVETIME_MS: u64 = 50;

/// Engine evaluation from the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i64),
    Mate(i64),
}

impl Score {
    /// `+0.35` style for centipawns, `#3` / `#-2` for mates.
    pub fn display(&self) -> String {
        match self {
            Score::Centipawns(cp) => format!("{:+.2}", *cp as f64 / 100.0),
            Score::Mate(n) => format!("#{}", n),
        }
    }
}

/// One line of engine output we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciLine {
    /// `bestmove`; `None` when the engine has no legal move
    BestMove(Option<Move>),
    Info { nodes: Option<u64>, score: Option<Score> },
    Other,
}

/// Parses one line of engine output.
pub fn parse_uci_line(line: &str) -> Result<UciLine, EnvError> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("bestmove") => match tokens.next() {
            None | Some("(none)") | Some("0000") => Ok(UciLine::BestMove(None)),
            Some(token) => token
                .parse::<Move>()
                .map(|mv| UciLine::BestMove(Some(mv)))
                .map_err(|e| EnvError::engine(format!("bad bestmove: {e}"))),
        },
        Some("info") => {
            let mut nodes = None;
            let mut score = None;
            while let Some(key) = tokens.next() {
                match key {
                    "nodes" => nodes = tokens.next().and_then(|v| v.parse().ok()),
                    "score" => {
                        let kind = tokens.next();
                        let value = tokens.next().and_then(|v| v.parse::<i64>().ok());
                        score = match (kind, value) {
                            (Some("cp"), Some(v)) => Some(Score::Centipawns(v)),
                            (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                            _ => score,
                        };
                    }
                    // Free text runs to the end of the line
                    "string" => break,
                    _ => {}
                }
            }
            Ok(UciLine::Info { nodes, score })
        }
        _ => Ok(UciLine::Other),
    }
}

/// `position` command for the game so far.
pub fn position_command(moves: &[Move]) -> String {
    if moves.is_empty() {
        return "position startpos".to_string();
    }
    let list: Vec<&str> = moves.iter().map(Move::as_str).collect();
    format!("position startpos moves {}", list.join(" "))
}

fn movetime_ms(budget: ThinkBudget) -> u64 {
    budget.secs().saturating_mul(1000).max(MIN_MOVETIME_MS)
}

/// Launches one engine process per contest.
#[derive(Debug, Clone)]
pub struct UciFactory {
    program: PathBuf,
    args: Vec<String>,

    /// `setoption` pairs sent after the handshake
    options: Vec<(String, String)>,
}

impl UciFactory {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }

    /// Program and arguments, for logging.
    pub fn describe(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl OracleFactory for UciFactory {
    type Oracle = UciOracle;

    async fn create(&self, game_id: &GameId) -> Result<UciOracle, EnvError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EnvError::engine(format!("failed to start {}: {e}", self.program.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EnvError::engine("engine stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EnvError::engine("engine stdout not captured"))?;

        let mut oracle = UciOracle {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            moves: Vec::new(),
            telemetry: None,
            broken: None,
        };

        tokio::time::timeout(HANDSHAKE_TIMEOUT, oracle.handshake(&self.options))
            .await
            .map_err(|_| EnvError::Timeout(HANDSHAKE_TIMEOUT.as_millis() as u64))??;

        debug!("Engine ready for game {} (pid {:?})", game_id, oracle.child.id());
        Ok(oracle)
    }
}

/// A UCI engine process playing one contest.
pub struct UciOracle {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,

    /// Every half-move of the contest, ours included
    moves: Vec<Move>,

    telemetry: Option<Telemetry>,

    /// Set once the process misbehaves; all later requests fail with it
    broken: Option<String>,
}

impl UciOracle {
    async fn send(&mut self, command: &str) -> Result<(), EnvError> {
        let line = format!("{command}\n");
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EnvError::engine(format!("engine write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EnvError::engine(format!("engine write failed: {e}")))
    }

    async fn read_line(&mut self) -> Result<String, EnvError> {
        match self.stdout.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(EnvError::engine("engine closed its output")),
            Err(e) => Err(EnvError::engine(format!("engine read failed: {e}"))),
        }
    }

    async fn wait_for(&mut self, token: &str) -> Result<(), EnvError> {
        loop {
            if self.read_line().await?.trim() == token {
                return Ok(());
            }
        }
    }

    async fn handshake(&mut self, options: &[(String, String)]) -> Result<(), EnvError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;
        for (name, value) in options {
            self.send(&format!("setoption name {name} value {value}")).await?;
        }
        self.send("ucinewgame").await?;
        self.send("isready").await?;
        self.wait_for("readyok").await
    }

    async fn search(&mut self, budget: ThinkBudget) -> Result<Option<Move>, EnvError> {
        let position = position_command(&self.moves);
        self.send(&position).await?;
        self.send(&format!("go movetime {}", movetime_ms(budget))).await?;

        let started = Instant::now();
        let mut telemetry = Telemetry::default();
        loop {
            let line = self.read_line().await?;
            match parse_uci_line(&line)? {
                UciLine::Info { nodes, score } => {
                    if let Some(nodes) = nodes {
                        telemetry.nodes = nodes;
                    }
                    if let Some(score) = score {
                        telemetry.evaluation = Some(score.display());
                    }
                }
                UciLine::BestMove(best) => {
                    telemetry.elapsed = started.elapsed();
                    self.telemetry = Some(telemetry);
                    return Ok(best);
                }
                UciLine::Other => {}
            }
        }
    }
}

#[async_trait]
impl Oracle for UciOracle {
    async fn register_opponent_move(&mut self, mv: &Move) {
        self.moves.push(mv.clone());
    }

    async fn request_move(&mut self, budget: ThinkBudget) -> MoveOutcome {
        if let Some(reason) = &self.broken {
            return MoveOutcome::EngineError(reason.clone());
        }

        match self.search(budget).await {
            Ok(Some(mv)) => {
                self.moves.push(mv.clone());
                MoveOutcome::Move(mv)
            }
            Ok(None) => MoveOutcome::NoMoveAvailable,
            Err(e) => {
                warn!("Engine failed: {}", e);
                self.broken = Some(e.to_string());
                MoveOutcome::EngineError(e.to_string())
            }
        }
    }

    fn telemetry(&self) -> Option<Telemetry> {
        self.telemetry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(token: &str) -> Move {
        token.parse().unwrap()
    }

    #[test]
    fn test_parse_bestmove() {
        assert_eq!(
            parse_uci_line("bestmove e2e4 ponder e7e5").unwrap(),
            UciLine::BestMove(Some(mv("e2e4")))
        );
        assert_eq!(parse_uci_line("bestmove e7e8q").unwrap(), UciLine::BestMove(Some(mv("e7e8q"))));
        assert_eq!(parse_uci_line("bestmove (none)").unwrap(), UciLine::BestMove(None));
        assert_eq!(parse_uci_line("bestmove 0000").unwrap(), UciLine::BestMove(None));
        assert!(parse_uci_line("bestmove z9z9").is_err());
    }

    #[test]
    fn test_parse_info() {
        let line = "info depth 12 seldepth 18 score cp -35 nodes 123456 nps 900000 pv e7e5 g1f3";
        assert_eq!(
            parse_uci_line(line).unwrap(),
            UciLine::Info {
                nodes: Some(123_456),
                score: Some(Score::Centipawns(-35))
            }
        );

        let mate = parse_uci_line("info depth 5 score mate 3 nodes 900").unwrap();
        assert_eq!(
            mate,
            UciLine::Info {
                nodes: Some(900),
                score: Some(Score::Mate(3))
            }
        );

        let text = parse_uci_line("info string nodes 5 are not counted").unwrap();
        assert_eq!(text, UciLine::Info { nodes: None, score: None });
        assert_eq!(parse_uci_line("readyok").unwrap(), UciLine::Other);
    }

    #[test]
    fn test_score_display() {
        assert_eq!(Score::Centipawns(35).display(), "+0.35");
        assert_eq!(Score::Centipawns(-120).display(), "-1.20");
        assert_eq!(Score::Mate(3).display(), "#3");
        assert_eq!(Score::Mate(-2).display(), "#-2");
    }

    #[test]
    fn test_position_command() {
        assert_eq!(position_command(&[]), "position startpos");
        assert_eq!(
            position_command(&[mv("e2e4"), mv("c7c5")]),
            "position startpos moves e2e4 c7c5"
        );
    }

    #[test]
    fn test_movetime_floor() {
        assert_eq!(movetime_ms(ThinkBudget::from_secs(0)), MIN_MOVETIME_MS);
        assert_eq!(movetime_ms(ThinkBudget::from_secs(15)), 15_000);
        assert_eq!(movetime_ms(ThinkBudget::from_secs(u64::MAX)), u64::MAX);
    }

    #[test]
    fn test_describe() {
        let factory = UciFactory::new("/usr/bin/stockfish").with_args(vec!["--threads".into(), "2".into()]);
        assert_eq!(factory.describe(), "/usr/bin/stockfish --threads 2");
    }

    #[cfg(unix)]
    const FAKE_ENGINE: &str = r#"
while read cmd; do
  case "$cmd" in
    uci) echo "id name fake"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) echo "info depth 1 score cp 35 nodes 1200"; echo "bestmove e7e5" ;;
    quit) exit 0 ;;
  esac
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plays_against_fake_engine() {
        let factory = UciFactory::new("sh").with_args(vec!["-c".to_string(), FAKE_ENGINE.to_string()]);
        let mut oracle = factory.create(&GameId::new("g1")).await.unwrap();

        oracle.register_opponent_move(&mv("e2e4")).await;
        let outcome = oracle.request_move(ThinkBudget::from_secs(0)).await;

        assert_eq!(outcome, MoveOutcome::Move(mv("e7e5")));
        assert_eq!(oracle.moves, vec![mv("e2e4"), mv("e7e5")]);
        let telemetry = oracle.telemetry().unwrap();
        assert_eq!(telemetry.nodes, 1200);
        assert_eq!(telemetry.evaluation.as_deref(), Some("+0.35"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dead_engine_is_engine_error() {
        // Completes the handshake, then exits on the first search
        let script = r#"
while read cmd; do
  case "$cmd" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) exit 1 ;;
  esac
done
"#;
        let factory = UciFactory::new("sh").with_args(vec!["-c".to_string(), script.to_string()]);
        let mut oracle = factory.create(&GameId::new("g2")).await.unwrap();

        let first = oracle.request_move(ThinkBudget::from_secs(1)).await;
        assert!(matches!(first, MoveOutcome::EngineError(_)));
        let second = oracle.request_move(ThinkBudget::from_secs(1)).await;
        assert!(matches!(second, MoveOutcome::EngineError(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let factory = UciFactory::new("/nonexistent/rookery-engine");
        let err = factory.create(&GameId::new("g3")).await.err().unwrap();
        assert!(matches!(err, EnvError::Engine(_)));
    }
}
