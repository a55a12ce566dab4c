use std::io::{self, BufRead, Write};

use colored::Colorize;

pub trait InputParser {
    fn parse(input: &str) -> Result<Self, String>
    where
        Self: Sized;
}

impl InputParser for String {
    fn parse(input: &str) -> Result<Self, String> {
        Ok(input.to_string())
    }
}

impl InputParser for bool {
    fn parse(input: &str) -> Result<Self, String> {
        match input.trim() {
            "y" | "Y" | "yes" | "Yes" | "YES" => Ok(true),
            "n" | "N" | "no" | "No" | "NO" => Ok(false),
            _ => Err("Invalid input, answer y or n".to_string()),
        }
    }
}

impl InputParser for u32 {
    fn parse(input: &str) -> Result<Self, String> {
        input
            .trim()
            .parse::<u32>()
            .map_err(|_| "Invalid input, expected a number".to_string())
    }
}

/// Line based prompts on a terminal, or on any reader in tests.
pub struct Prompt {
    input: Box<dyn BufRead>,
}

impl Prompt {
    pub fn stdin() -> Self {
        Self::new(io::BufReader::new(io::stdin()))
    }

    pub fn new(input: impl BufRead + 'static) -> Self {
        Self {
            input: Box::new(input),
        }
    }

    fn read_line(&mut self) -> anyhow::Result<String> {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            bail!("input closed");
        }
        Ok(line.trim().to_string())
    }

    /// Index of the chosen option.
    pub fn select<T: AsRef<str>>(
        &mut self,
        question: &str,
        options: &[T],
    ) -> anyhow::Result<usize> {
        if options.is_empty() {
            bail!("nothing to select");
        }
        println!("{}", question.yellow());
        for (i, option) in options.iter().enumerate() {
            println!("  {}: {}", i, option.as_ref());
        }

        loop {
            match self.read_line()?.parse::<usize>() {
                Ok(n) if n < options.len() => return Ok(n),
                _ => println!("{}", "Invalid input".red()),
            }
        }
    }

    pub fn input<T: InputParser>(&mut self, question: &str) -> anyhow::Result<T> {
        println!("{}", question.yellow());
        loop {
            let line = self.read_line()?;
            match T::parse(&line) {
                Ok(v) => return Ok(v),
                Err(e) => println!("{}", e.red()),
            }
        }
    }

    /// Like [`Prompt::input`], an empty answer keeps `current`.
    pub fn edit<T: InputParser + ToString>(
        &mut self,
        question: &str,
        current: T,
    ) -> anyhow::Result<T> {
        println!(
            "{} {}",
            question.yellow(),
            format!("[{}]", current.to_string()).dimmed()
        );
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(current);
            }
            match T::parse(&line) {
                Ok(v) => return Ok(v),
                Err(e) => println!("{}", e.red()),
            }
        }
    }

    pub fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        self.input::<bool>(&format!("{question} (y/n)"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn scripted(lines: &str) -> Prompt {
        Prompt::new(Cursor::new(lines.to_string()))
    }

    #[test]
    fn select_retries_until_valid() {
        let mut p = scripted("x\n7\n1\n");
        assert_eq!(p.select("pick", &["a", "b"]).unwrap(), 1);
    }

    #[test]
    fn closed_input_is_an_error() {
        let mut p = scripted("");
        assert!(p.select("pick", &["a"]).is_err());
        assert!(p.input::<String>("name").is_err());
    }

    #[test]
    fn edit_keeps_current_on_empty() {
        let mut p = scripted("\nabc\n");
        assert_eq!(p.edit("ram", 2048u32).unwrap(), 2048);
        assert_eq!(p.edit("ram", 2048u32).unwrap_err().to_string(), "input closed");
    }

    #[test]
    fn confirm_parses_yes_no() {
        let mut p = scripted("maybe\ny\nno\n");
        assert!(p.confirm("sure?").unwrap());
        assert!(!p.confirm("sure?").unwrap());
    }
}
