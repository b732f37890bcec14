//! Interactive oracle: moves are typed on stdin.

use async_trait::async_trait;
use rookery_env::{EnvError, GameId, Move, MoveOutcome, Oracle, OracleFactory, ThinkBudget};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};

/// What the operator typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualInput {
    Play(Move),
    NoMove,
    Resign,
    Invalid(String),
}

pub fn parse_input(line: &str) -> ManualInput {
    match line.trim() {
        "none" => ManualInput::NoMove,
        "resign" => ManualInput::Resign,
        token => token
            .parse()
            .map(ManualInput::Play)
            .unwrap_or_else(|e| ManualInput::Invalid(format!("{e}"))),
    }
}

/// Creates one [`ManualOracle`] per contest. Only usable with a single slot.
#[derive(Debug, Default)]
pub struct ManualFactory;

#[async_trait]
impl OracleFactory for ManualFactory {
    type Oracle = ManualOracle<BufReader<Stdin>>;

    async fn create(&self, game_id: &GameId) -> Result<Self::Oracle, EnvError> {
        println!("Game {game_id}: type moves like e2e4, `none` for no move, `resign` to give up");
        Ok(ManualOracle::new(BufReader::new(tokio::io::stdin())))
    }
}

pub struct ManualOracle<R> {
    input: R,
    last_opponent: Option<Move>,
}

impl<R: AsyncBufRead + Unpin + Send + 'static> ManualOracle<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            last_opponent: None,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send + 'static> Oracle for ManualOracle<R> {
    async fn register_opponent_move(&mut self, mv: &Move) {
        self.last_opponent = Some(mv.clone());
    }

    async fn request_move(&mut self, budget: ThinkBudget) -> MoveOutcome {
        match self.last_opponent.take() {
            Some(mv) => println!("Opponent played {mv}. Your move ({budget}):"),
            None => println!("Your move ({budget}):"),
        }

        loop {
            let mut line = String::new();
            match self.input.read_line(&mut line).await {
                Ok(0) => return MoveOutcome::EngineError("stdin closed".to_string()),
                Ok(_) => {}
                Err(e) => return MoveOutcome::EngineError(format!("stdin read failed: {e}")),
            }

            match parse_input(&line) {
                ManualInput::Play(mv) => return MoveOutcome::Move(mv),
                ManualInput::NoMove => return MoveOutcome::NoMoveAvailable,
                ManualInput::Resign => return MoveOutcome::EngineError("resigned by operator".to_string()),
                ManualInput::Invalid(reason) => println!("{reason}, try again:"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input(" e2e4\n"), ManualInput::Play("e2e4".parse().unwrap()));
        assert_eq!(parse_input("none"), ManualInput::NoMove);
        assert_eq!(parse_input("resign"), ManualInput::Resign);
        assert!(matches!(parse_input("castle"), ManualInput::Invalid(_)));
    }

    #[tokio::test]
    async fn test_invalid_lines_are_retried() {
        let mut oracle = ManualOracle::new(&b"hello\ne9e4\ng1f3\n"[..]);
        let outcome = oracle.request_move(ThinkBudget::from_secs(3)).await;
        assert_eq!(outcome, MoveOutcome::Move("g1f3".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_eof_and_resign_end_the_game() {
        let mut closed = ManualOracle::new(&b""[..]);
        assert!(matches!(
            closed.request_move(ThinkBudget::from_secs(1)).await,
            MoveOutcome::EngineError(_)
        ));

        let mut resigning = ManualOracle::new(&b"resign\n"[..]);
        assert!(matches!(
            resigning.request_move(ThinkBudget::from_secs(1)).await,
            MoveOutcome::EngineError(_)
        ));
    }
}
