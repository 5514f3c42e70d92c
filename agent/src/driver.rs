use crate::conversation::{Conversation, Observer};
use crate::turn::{History, Turn};
use config::Scope;
use std::io;
use tracing::{debug, error, info};

/// Blocking source of user lines, such as a terminal prompt.
pub trait LineSource {
    /// The next line, or `None` once input has ended.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Whether `line` is the exit sentinel, ignoring case and surrounding whitespace.
pub fn is_exit(line: &str, sentinel: &str) -> bool {
    line.trim().to_lowercase() == sentinel.trim().to_lowercase()
}

/// Reads lines and runs one request per line until the exit sentinel or end of input.
#[derive(Debug, Clone)]
pub struct Driver {
    scope: Scope,
    exit_sentinel: String,
}

impl Driver {
    pub fn new(scope: Scope, exit_sentinel: impl Into<String>) -> Self {
        Self {
            scope,
            exit_sentinel: exit_sentinel.into(),
        }
    }

    pub fn is_exit(&self, line: &str) -> bool {
        is_exit(line, &self.exit_sentinel)
    }

    /// Runs until the user exits. Failed requests are reported to `observer` and the next line is read.
    ///
    /// With [`Scope::Session`] the returned history holds every completed
    /// exchange of the session; a failed request is rolled back so the next
    /// line does not follow a dangling `user` turn. With [`Scope::PerRequest`]
    /// it holds the last request only.
    pub async fn run(
        &self,
        conversation: &mut Conversation<'_>,
        input: &mut dyn LineSource,
        observer: &mut dyn Observer,
    ) -> io::Result<History> {
        let mut history = History::new();

        loop {
            let Some(line) = input.read_line()? else {
                info!("Input ended");
                return Ok(history);
            };
            if self.is_exit(&line) {
                info!("Exit requested");
                return Ok(history);
            }

            let line = line.trim();
            if line.is_empty() {
                debug!("Skipping blank line");
                continue;
            }

            let start = match self.scope {
                Scope::PerRequest => {
                    history = History::seeded(line);
                    0
                }
                Scope::Session => {
                    let start = history.len();
                    history.push(Turn::user(line));
                    start
                }
            };

            if let Err(err) = conversation.run(&mut history, observer).await {
                error!(%err, "Request aborted");
                observer.on_failure(&err);
                if self.scope == Scope::Session {
                    history.truncate(start);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::LoopError;
    use crate::registry::ToolRegistry;
    use ai::scripted::ScriptedModel;
    use db::sqlite::SqliteTodoStore;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    struct Lines(VecDeque<&'static str>);

    impl LineSource for Lines {
        fn read_line(&mut self) -> io::Result<Option<String>> {
            Ok(self.0.pop_front().map(str::to_string))
        }
    }

    #[derive(Default)]
    struct Outputs {
        outputs: Vec<String>,
        failures: usize,
    }

    impl Observer for Outputs {
        fn on_output(&mut self, output: &str) {
            self.outputs.push(output.to_string());
        }

        fn on_failure(&mut self, _error: &LoopError) {
            self.failures += 1;
        }
    }

    async fn registry() -> ToolRegistry {
        ToolRegistry::new(Box::new(SqliteTodoStore::in_memory().await.unwrap()))
    }

    #[test]
    fn free_exit_check_matches_the_driver() {
        assert!(is_exit(" QUIT\n", "quit"));
        assert!(!is_exit("quit now", "quit"));
    }

    #[test]
    fn exit_sentinel_ignores_case_and_padding() {
        let driver = Driver::new(Scope::PerRequest, "exit");
        assert!(driver.is_exit("EXIT"));
        assert!(driver.is_exit("  Exit \n"));
        assert!(!driver.is_exit("exit now"));
    }

    #[tokio::test]
    async fn per_request_scope_starts_each_line_fresh() {
        let mut registry = registry().await;
        let model = ScriptedModel::with_replies([
            r#"{"type":"output","output":"one"}"#,
            r#"{"type":"output","output":"two"}"#,
        ]);
        let mut conversation = Conversation::new(&model, &mut registry);
        let mut outputs = Outputs::default();

        let history = Driver::new(Scope::PerRequest, "exit")
            .run(
                &mut conversation,
                &mut Lines(VecDeque::from(["first", "", "second", "Exit", "never read"])),
                &mut outputs,
            )
            .await
            .unwrap();

        assert_eq!(outputs.outputs, vec!["one", "two"]);
        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 1);
        assert_eq!(requests[1].messages[0].content, r#"{"type":"user","user":"second"}"#);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn session_scope_keeps_earlier_exchanges() {
        let mut registry = registry().await;
        let model = ScriptedModel::with_replies([
            r#"{"type":"output","output":"one"}"#,
            r#"{"type":"output","output":"two"}"#,
        ]);
        let mut conversation = Conversation::new(&model, &mut registry);

        let history = Driver::new(Scope::Session, "exit")
            .run(
                &mut conversation,
                &mut Lines(VecDeque::from(["first", "second"])),
                &mut Outputs::default(),
            )
            .await
            .unwrap();

        assert_eq!(model.requests()[1].messages.len(), 3);
        assert_eq!(
            history.turns().iter().map(Turn::kind).collect::<Vec<_>>(),
            vec!["user", "output", "user", "output"]
        );
    }

    #[tokio::test]
    async fn session_scope_rolls_back_a_failed_request() {
        let mut registry = registry().await;
        let model = ScriptedModel::with_replies([
            r#"{"type":"output","output":"one"}"#,
            r#"{"type":"action","function":"getAllTodos"}"#,
            "hi there",
            r#"{"type":"output","output":"three"}"#,
        ]);
        let mut conversation = Conversation::new(&model, &mut registry);
        let mut outputs = Outputs::default();

        let history = Driver::new(Scope::Session, "exit")
            .run(
                &mut conversation,
                &mut Lines(VecDeque::from(["first", "second", "third"])),
                &mut outputs,
            )
            .await
            .unwrap();

        assert_eq!(outputs.failures, 1);
        assert_eq!(model.requests()[3].messages.len(), 3);
        assert_eq!(
            history.turns().iter().map(Turn::kind).collect::<Vec<_>>(),
            vec!["user", "output", "user", "output"]
        );
        assert_eq!(history.turns()[2], Turn::user("third"));
    }

    #[tokio::test]
    async fn failed_request_does_not_stop_the_driver() {
        let mut registry = registry().await;
        let model = ScriptedModel::with_replies(["hi there", r#"{"type":"output","output":"ok"}"#]);
        let mut conversation = Conversation::new(&model, &mut registry);
        let mut outputs = Outputs::default();

        Driver::new(Scope::PerRequest, "exit")
            .run(
                &mut conversation,
                &mut Lines(VecDeque::from(["one", "two"])),
                &mut outputs,
            )
            .await
            .unwrap();

        assert_eq!(outputs.failures, 1);
        assert_eq!(outputs.outputs, vec!["ok"]);
    }
}
