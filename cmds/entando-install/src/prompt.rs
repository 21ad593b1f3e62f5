//! Interactive questions to the operator.
//!
//! Every decision point of the installer goes through [`Prompter`], so the
//! flow can be driven by a script in tests.

use std::{
	io::{self, BufRead, BufReader, Write},
	ops::Range,
};

use thiserror::Error;

/// Number of choices shown per screen unless a caller asks otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum PromptError {
	#[error("talking to the terminal")]
	Io(#[from] io::Error),

	#[error("input was closed before an answer was given")]
	Closed,

	#[error("there is nothing to choose from")]
	NoChoices,
}

pub trait Prompter: Send {
	/// Ask a yes/no question.
	fn confirm(&mut self, message: &str) -> Result<bool, PromptError>;

	/// Ask for a non-empty line of text.
	fn input(&mut self, message: &str) -> Result<String, PromptError>;

	/// Let the operator pick one of `choices`, `page_size` entries per
	/// screen. Returns the index of the chosen entry.
	fn select(
		&mut self,
		message: &str,
		choices: &[String],
		page_size: usize,
	) -> Result<usize, PromptError>;
}

/// A window over a list of choices. Paging stops at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
	len: usize,
	page_size: usize,
	page: usize,
}

impl Pager {
	pub fn new(len: usize, page_size: usize) -> Self {
		Self {
			len,
			page_size: page_size.max(1),
			page: 0,
		}
	}

	pub fn page(&self) -> usize {
		self.page
	}

	pub fn page_count(&self) -> usize {
		self.len.div_ceil(self.page_size).max(1)
	}

	/// Indices visible on the current page.
	pub fn range(&self) -> Range<usize> {
		let start = self.page * self.page_size;
		start..(start + self.page_size).min(self.len)
	}

	/// Move to the next page. Returns `false` on the last page.
	pub fn next(&mut self) -> bool {
		if self.page + 1 < self.page_count() {
			self.page += 1;
			true
		} else {
			false
		}
	}

	/// Move to the previous page. Returns `false` on the first page.
	pub fn prev(&mut self) -> bool {
		if self.page > 0 {
			self.page -= 1;
			true
		} else {
			false
		}
	}
}

/// [`Prompter`] reading answers line by line.
pub struct TerminalPrompter<R, W> {
	input: R,
	output: W,
}

impl TerminalPrompter<BufReader<io::Stdin>, io::Stderr> {
	/// Ask on stderr, read answers from stdin.
	pub fn stdio() -> Self {
		Self::new(BufReader::new(io::stdin()), io::stderr())
	}
}

impl<R: BufRead + Send, W: Write + Send> TerminalPrompter<R, W> {
	pub fn new(input: R, output: W) -> Self {
		Self { input, output }
	}

	fn ask(&mut self, question: &str) -> Result<String, PromptError> {
		write!(self.output, "{question}")?;
		self.output.flush()?;

		let mut line = String::new();
		if self.input.read_line(&mut line)? == 0 {
			return Err(PromptError::Closed);
		}
		Ok(line.trim().to_string())
	}
}

impl<R: BufRead + Send, W: Write + Send> Prompter for TerminalPrompter<R, W> {
	fn confirm(&mut self, message: &str) -> Result<bool, PromptError> {
		loop {
			let answer = self.ask(&format!("? {message} [y/n]: "))?;
			match answer.to_lowercase().as_str() {
				"y" | "yes" => return Ok(true),
				"n" | "no" => return Ok(false),
				_ => writeln!(self.output, "Please answer 'y' or 'n'.")?,
			}
		}
	}

	fn input(&mut self, message: &str) -> Result<String, PromptError> {
		loop {
			let answer = self.ask(&format!("? {message} "))?;
			if !answer.is_empty() {
				return Ok(answer);
			}
		}
	}

	fn select(
		&mut self,
		message: &str,
		choices: &[String],
		page_size: usize,
	) -> Result<usize, PromptError> {
		if choices.is_empty() {
			return Err(PromptError::NoChoices);
		}

		let mut pager = Pager::new(choices.len(), page_size);
		writeln!(self.output, "? {message}")?;
		loop {
			for index in pager.range() {
				writeln!(self.output, "  {:>3}) {}", index + 1, choices[index])?;
			}
			let hint = if pager.page_count() > 1 {
				format!(
					"(page {}/{}, 'n' next, 'p' previous) ",
					pager.page() + 1,
					pager.page_count()
				)
			} else {
				String::new()
			};

			let answer = self.ask(&format!("{hint}Enter a number: "))?;
			match answer.as_str() {
				"n" => {
					pager.next();
				}
				"p" => {
					pager.prev();
				}
				_ => match answer.parse::<usize>() {
					Ok(n) if (1..=choices.len()).contains(&n) => return Ok(n - 1),
					_ => writeln!(
						self.output,
						"Please enter a number between 1 and {}.",
						choices.len()
					)?,
				},
			}
		}
	}
}
