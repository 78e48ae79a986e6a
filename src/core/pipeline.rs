//! Command line to pipeline conversion.
//!
//! This is the boundary the job-control engine consumes: a line becomes a
//! list of pipelines, each an ordered list of argv vectors plus redirections
//! and a background flag. Only single and double quotes are understood, with
//! no escapes inside them.

use crate::errors::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct OutputRedirect {
    pub path: String,
    pub append: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pipeline {
    /// argv of every stage, in pipeline order
    pub commands: Vec<Vec<String>>,
    /// stdin of the first stage
    pub stdin: Option<String>,
    /// stdout of the last stage
    pub stdout: Option<OutputRedirect>,
    pub background: bool,
}

impl Pipeline {
    /// Parses a command line into the pipelines it contains, in order.
    ///
    /// # Examples
    ///
    /// ```
    /// use jcsh::core::pipeline::Pipeline;
    ///
    /// let pipelines = Pipeline::parse("sleep 10 & printf 'a b' | wc -c").unwrap();
    /// assert_eq!(pipelines.len(), 2);
    /// assert!(pipelines[0].background);
    /// assert_eq!(pipelines[1].commands[0], vec!["printf", "a b"]);
    /// ```
    pub fn parse(line: &str) -> Result<Vec<Pipeline>> {
        let mut pipelines = Vec::new();
        let mut builder = Builder::default();

        for token in tokenize(line)? {
            match token {
                Token::Word(word) => builder.word(word),
                Token::Pipe => builder.pipe()?,
                Token::Less => builder.redirect(Pending::Stdin, "<")?,
                Token::Great => builder.redirect(Pending::Stdout { append: false }, ">")?,
                Token::DGreat => builder.redirect(Pending::Stdout { append: true }, ">>")?,
                Token::Amp => pipelines.push(builder.finish(true, "&")?),
                Token::Semi if builder.is_empty() => {}
                Token::Semi => pipelines.push(builder.finish(false, ";")?),
            }
        }

        if !builder.is_empty() {
            pipelines.push(builder.finish(false, "newline")?);
        }

        Ok(pipelines)
    }

    pub fn is_builtin_candidate(&self) -> bool {
        self.commands.len() == 1
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Pipe,
    Amp,
    Semi,
    Less,
    Great,
    DGreat,
}

fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        let op = match c {
            '|' => Some(Token::Pipe),
            '&' => Some(Token::Amp),
            ';' | '\n' => Some(Token::Semi),
            '<' => Some(Token::Less),
            '>' => {
                if chars.peek() == Some(&'>') {
                    chars.next();
                    Some(Token::DGreat)
                } else {
                    Some(Token::Great)
                }
            }
            _ => None,
        };

        if op.is_some() || c.is_whitespace() {
            if in_word {
                tokens.push(Token::Word(word.split_off(0)));
                in_word = false;
            }
            tokens.extend(op);
            continue;
        }

        match c {
            '\'' | '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(other) => word.push(other),
                        None => return Err(Error::syntax(c.to_string())),
                    }
                }
            }
            '#' if !in_word => {
                while chars.peek().map_or(false, |&n| n != '\n') {
                    chars.next();
                }
            }
            _ => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        tokens.push(Token::Word(word));
    }

    Ok(tokens)
}

#[derive(Clone, Copy, Debug)]
enum Pending {
    Stdin,
    Stdout { append: bool },
}

#[derive(Debug, Default)]
struct Builder {
    pipeline: Pipeline,
    argv: Vec<String>,
    pending: Option<Pending>,
}

impl Builder {
    fn is_empty(&self) -> bool {
        self.argv.is_empty()
            && self.pipeline.commands.is_empty()
            && self.pending.is_none()
            && self.pipeline.stdin.is_none()
            && self.pipeline.stdout.is_none()
    }

    fn word(&mut self, word: String) {
        match self.pending.take() {
            Some(Pending::Stdin) => self.pipeline.stdin = Some(word),
            Some(Pending::Stdout { append }) => {
                self.pipeline.stdout = Some(OutputRedirect { path: word, append })
            }
            None => self.argv.push(word),
        }
    }

    fn redirect(&mut self, pending: Pending, token: &str) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::syntax(token));
        }
        self.pending = Some(pending);
        Ok(())
    }

    fn pipe(&mut self) -> Result<()> {
        if self.argv.is_empty() || self.pending.is_some() {
            return Err(Error::syntax("|"));
        }
        self.pipeline.commands.push(self.argv.split_off(0));
        Ok(())
    }

    fn finish(&mut self, background: bool, token: &str) -> Result<Pipeline> {
        if self.argv.is_empty() || self.pending.is_some() {
            return Err(Error::syntax(token));
        }
        self.pipeline.commands.push(self.argv.split_off(0));
        self.pipeline.background = background;
        Ok(std::mem::replace(&mut self.pipeline, Pipeline::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_simple_command() {
        let pipelines = Pipeline::parse("echo test").unwrap();
        assert_eq!(
            pipelines,
            vec![Pipeline {
                commands: vec![argv(&["echo", "test"])],
                ..Default::default()
            }]
        );
    }

    #[test]
    fn test_empty_line() {
        assert!(Pipeline::parse("").unwrap().is_empty());
        assert!(Pipeline::parse("   # just a comment").unwrap().is_empty());
    }

    #[test]
    fn test_pipeline_with_quotes() {
        let pipelines = Pipeline::parse(r"printf 'a\nb\nc\n' | grep b").unwrap();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(
            pipelines[0].commands,
            vec![argv(&["printf", r"a\nb\nc\n"]), argv(&["grep", "b"])]
        );
        assert!(!pipelines[0].background);
    }

    #[test]
    fn test_background_and_sequence() {
        let pipelines = Pipeline::parse("sleep 100 &; jobs").unwrap();
        assert_eq!(pipelines.len(), 2);
        assert!(pipelines[0].background);
        assert_eq!(pipelines[1].commands, vec![argv(&["jobs"])]);
        assert!(!pipelines[1].background);
    }

    #[test]
    fn test_redirects() {
        let pipelines = Pipeline::parse("sort < in.txt | uniq >> out.txt").unwrap();
        assert_eq!(pipelines[0].stdin, Some("in.txt".to_string()));
        assert_eq!(
            pipelines[0].stdout,
            Some(OutputRedirect {
                path: "out.txt".to_string(),
                append: true,
            })
        );

        let pipelines = Pipeline::parse("echo hi >out.txt").unwrap();
        assert_eq!(pipelines[0].commands, vec![argv(&["echo", "hi"])]);
        assert_eq!(
            pipelines[0].stdout,
            Some(OutputRedirect {
                path: "out.txt".to_string(),
                append: false,
            })
        );
    }

    #[test]
    fn test_empty_quoted_argument() {
        let pipelines = Pipeline::parse("printf '%s|' '' x").unwrap();
        assert_eq!(pipelines[0].commands, vec![argv(&["printf", "%s|", "", "x"])]);
    }

    #[test]
    fn test_syntax_errors() {
        for (line, token) in &[
            ("| grep b", "|"),
            ("echo a |", "newline"),
            ("echo a > ", "newline"),
            ("echo a > | b", "|"),
            ("&", "&"),
            ("echo 'unterminated", "'"),
        ] {
            let error = Pipeline::parse(line).unwrap_err();
            assert_eq!(
                *error.kind(),
                ErrorKind::Syntax(token.to_string()),
                "line: {}",
                line
            );
        }
    }
}
