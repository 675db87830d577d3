//! The two single-global-instance games: hangman (`hang`) and tic-tac-toe
//! (`tic`), plus the `8ball` novelty command. Ported from `hangman.go` /
//! `tictactoe.go` / the `8ball` case in `original_source/commands.go`. Each
//! game keeps its one shared instance behind a process-wide lock, matching
//! the original's package-level game variable.

use std::sync::OnceLock;

use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Duration;

use super::{CommandContext, CommandOutcome};

const EIGHT_BALL_REPLIES: &[&str] = &[
    "It is certain.",
    "Without a doubt.",
    "You may rely on it.",
    "Ask again later.",
    "Cannot predict now.",
    "Don't count on it.",
    "My reply is no.",
    "Very doubtful.",
];

pub fn eight_ball<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if rest.trim().is_empty() {
            return CommandOutcome::Reply("ask a question first".to_string());
        }
        let delay_ms = rand::thread_rng().gen_range(0..10_000);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let reply = EIGHT_BALL_REPLIES[rand::random::<usize>() % EIGHT_BALL_REPLIES.len()];
        CommandOutcome::Broadcast(format!("🎱 {reply}"))
    }
    .boxed()
}

#[derive(Default)]
struct HangmanState {
    word: Option<String>,
    guessed: Vec<char>,
    wrong_guesses: u32,
}

fn hangman_state() -> &'static Mutex<HangmanState> {
    static STATE: OnceLock<Mutex<HangmanState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(HangmanState::default()))
}

const WORD_LIST: &[&str] = &["rust", "devzat", "ferris", "terminal", "broadcast"];

pub fn hangman<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let mut state = hangman_state().lock().await;
        let arg = rest.trim();

        if state.word.is_none() {
            let word = WORD_LIST[rand::random::<usize>() % WORD_LIST.len()].to_string();
            state.word = Some(word);
            state.guessed.clear();
            state.wrong_guesses = 0;
        }

        let word = state.word.clone().unwrap();
        if arg.len() == 1 {
            let letter = arg.chars().next().unwrap().to_ascii_lowercase();
            if !state.guessed.contains(&letter) {
                state.guessed.push(letter);
                if !word.contains(letter) {
                    state.wrong_guesses += 1;
                }
            }
        } else if !arg.is_empty() && arg.eq_ignore_ascii_case(&word) {
            let result = format!("solved! the word was {word}");
            *state = HangmanState::default();
            return CommandOutcome::Broadcast(result);
        }

        let masked: String =
            word.chars().map(|c| if state.guessed.contains(&c.to_ascii_lowercase()) { c } else { '_' }).collect();

        if !masked.contains('_') {
            let result = format!("solved! the word was {word}");
            *state = HangmanState::default();
            return CommandOutcome::Broadcast(result);
        }
        if state.wrong_guesses >= 6 {
            let result = format!("out of guesses! the word was {word}");
            *state = HangmanState::default();
            return CommandOutcome::Broadcast(result);
        }

        CommandOutcome::Broadcast(format!("{masked} ({} wrong guesses)", state.wrong_guesses))
    }
    .boxed()
}

#[derive(Default, Clone, Copy, PartialEq, Debug)]
enum Cell {
    #[default]
    Empty,
    X,
    O,
}

#[derive(Default)]
struct TicTacToeState {
    board: [Cell; 9],
    turn: Cell,
}

fn tic_tac_toe_state() -> &'static Mutex<TicTacToeState> {
    static STATE: OnceLock<Mutex<TicTacToeState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(TicTacToeState { board: [Cell::Empty; 9], turn: Cell::X }))
}

fn render_board(board: &[Cell; 9]) -> String {
    board
        .chunks(3)
        .map(|row| {
            row.iter()
                .map(|c| match c {
                    Cell::Empty => '.',
                    Cell::X => 'X',
                    Cell::O => 'O',
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn winner(board: &[Cell; 9]) -> Option<Cell> {
    const LINES: [[usize; 3]; 8] =
        [[0, 1, 2], [3, 4, 5], [6, 7, 8], [0, 3, 6], [1, 4, 7], [2, 5, 8], [0, 4, 8], [2, 4, 6]];
    for line in LINES {
        let [a, b, c] = line;
        if board[a] != Cell::Empty && board[a] == board[b] && board[b] == board[c] {
            return Some(board[a]);
        }
    }
    None
}

pub fn tic_tac_toe<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let mut state = tic_tac_toe_state().lock().await;
        let Ok(cell) = rest.trim().parse::<usize>() else {
            return CommandOutcome::Reply(format!("current board:\n{}", render_board(&state.board)));
        };
        if cell >= 9 || state.board[cell] != Cell::Empty {
            return CommandOutcome::Reply("invalid move".to_string());
        }
        state.board[cell] = state.turn;
        if let Some(winning) = winner(&state.board) {
            let mark = if winning == Cell::X { 'X' } else { 'O' };
            let board = render_board(&state.board);
            *state = TicTacToeState { board: [Cell::Empty; 9], turn: Cell::X };
            return CommandOutcome::Broadcast(format!("{board}\n{mark} wins!"));
        }
        state.turn = if state.turn == Cell::X { Cell::O } else { Cell::X };
        CommandOutcome::Broadcast(render_board(&state.board))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winner_detects_row() {
        let mut board = [Cell::Empty; 9];
        board[0] = Cell::X;
        board[1] = Cell::X;
        board[2] = Cell::X;
        assert_eq!(winner(&board), Some(Cell::X));
    }

    #[test]
    fn no_winner_on_empty_board() {
        assert_eq!(winner(&[Cell::Empty; 9]), None);
    }
}
