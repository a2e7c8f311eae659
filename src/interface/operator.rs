use log::{info, warn};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

/// Whoever stands in front of the pumps during setup: answers calibration and priming
/// questions.
pub trait Operator {
    fn confirm(&mut self, prompt: &str) -> bool;
    /// `None` means the operator gave up on the question.
    fn ask_number(&mut self, prompt: &str) -> Option<f64>;
    fn notify(&mut self, message: &str) {
        info!("{message}");
    }
}

/// Asks the operator through a terminal. Reads block the calling thread until a line comes in.
pub struct Console<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl Console<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        if let Err(e) = write!(self.output, "{prompt} ").and_then(|_| self.output.flush()) {
            warn!("Failed to write prompt: {e}");
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(e) => {
                warn!("Failed to read answer: {e}");
                None
            }
        }
    }
}

impl<R: BufRead, W: Write> Operator for Console<R, W> {
    fn confirm(&mut self, prompt: &str) -> bool {
        matches!(
            self.ask(&format!("{prompt} [y/n]")).as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y" | "yes")
        )
    }

    fn ask_number(&mut self, prompt: &str) -> Option<f64> {
        loop {
            let answer = self.ask(prompt)?;
            if answer.is_empty() {
                return None;
            }
            match answer.parse::<f64>() {
                Ok(number) => return Some(number),
                Err(_) => self.notify(&format!("'{answer}' is not a number, try again (empty to skip).")),
            }
        }
    }

    fn notify(&mut self, message: &str) {
        if let Err(e) = writeln!(self.output, "{message}") {
            warn!("Failed to write message: {e}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Answer {
    Yes,
    No,
    Number(f64),
    GiveUp,
}

/// Plays back canned answers. Once the script runs out it declines everything.
#[derive(Debug, Default)]
pub struct Scripted {
    answers: VecDeque<Answer>,
    pub prompts: Vec<String>,
    pub messages: Vec<String>,
}

impl Scripted {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Operator for Scripted {
    fn confirm(&mut self, prompt: &str) -> bool {
        self.prompts.push(prompt.to_string());
        matches!(self.answers.pop_front(), Some(Answer::Yes))
    }

    fn ask_number(&mut self, prompt: &str) -> Option<f64> {
        self.prompts.push(prompt.to_string());
        match self.answers.pop_front() {
            Some(Answer::Number(number)) => Some(number),
            _ => None,
        }
    }

    fn notify(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

#[test]
fn test_console_reads_answers() {
    let input = b"yes\nnope\n\nabc\n2.5\n" as &[u8];
    let mut output = Vec::new();
    let mut console = Console::new(input, &mut output);

    assert!(console.confirm("Calibrate?"));
    assert!(!console.confirm("Calibrate?"));
    assert_eq!(console.ask_number("Ounces?"), None);
    assert_eq!(console.ask_number("Ounces?"), Some(2.5));
    assert_eq!(console.ask_number("Ounces?"), None);

    let printed = String::from_utf8(output).unwrap();
    assert!(printed.contains("Calibrate? [y/n]"));
    assert!(printed.contains("'abc' is not a number"));
}

#[test]
fn test_scripted_declines_when_exhausted() {
    let mut operator = Scripted::new([Answer::Yes, Answer::Number(1.5)]);
    assert!(operator.confirm("first"));
    assert_eq!(operator.ask_number("second"), Some(1.5));
    assert_eq!(operator.remaining(), 0);
    assert!(!operator.confirm("third"));
    assert_eq!(operator.ask_number("fourth"), None);
    assert_eq!(operator.prompts, ["first", "second", "third", "fourth"]);
}
