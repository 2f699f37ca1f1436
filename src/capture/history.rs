use anyhow::Result;
use serde_json::Value;

/// The two programmatic history-mutation entry points of a page context.
/// Implemented by the embedder's history object; `PageHistory` is the
/// plain reference implementation.
pub trait HistoryOps {
    fn push_state(&mut self, state: Value, title: &str, url: &str) -> Result<()>;
    fn replace_state(&mut self, state: Value, title: &str, url: &str) -> Result<()>;
    fn current_url(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryMutation {
    Push { url: String },
    Replace { url: String },
}

/// Interception layer installed around a page's history at agent attach:
/// forwards arguments and return value untouched, and records each
/// successful mutation for the agent to turn into a navigation record.
pub struct TracedHistory {
    inner: Box<dyn HistoryOps>,
    mutations: Vec<HistoryMutation>,
}

impl TracedHistory {
    pub fn wrap(inner: Box<dyn HistoryOps>) -> Self {
        Self {
            inner,
            mutations: Vec::new(),
        }
    }

    pub fn push_state(&mut self, state: Value, title: &str, url: &str) -> Result<()> {
        let ret = self.inner.push_state(state, title, url);
        if ret.is_ok() {
            self.mutations.push(HistoryMutation::Push {
                url: self.inner.current_url().to_string(),
            });
        }
        ret
    }

    pub fn replace_state(&mut self, state: Value, title: &str, url: &str) -> Result<()> {
        let ret = self.inner.replace_state(state, title, url);
        if ret.is_ok() {
            self.mutations.push(HistoryMutation::Replace {
                url: self.inner.current_url().to_string(),
            });
        }
        ret
    }

    pub fn current_url(&self) -> &str {
        self.inner.current_url()
    }

    pub fn take_mutations(&mut self) -> Vec<HistoryMutation> {
        std::mem::take(&mut self.mutations)
    }
}

/// In-memory session history: an entry stack with a cursor, forward
/// entries dropped on push.
pub struct PageHistory {
    entries: Vec<String>,
    index: usize,
}

impl PageHistory {
    pub fn new(url: &str) -> Self {
        Self {
            entries: vec![url.to_string()],
            index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HistoryOps for PageHistory {
    fn push_state(&mut self, _state: Value, _title: &str, url: &str) -> Result<()> {
        self.entries.truncate(self.index + 1);
        self.entries.push(url.to_string());
        self.index += 1;
        Ok(())
    }

    fn replace_state(&mut self, _state: Value, _title: &str, url: &str) -> Result<()> {
        self.entries[self.index] = url.to_string();
        Ok(())
    }

    fn current_url(&self) -> &str {
        &self.entries[self.index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn wrapper_forwards_and_records_mutations() {
        let mut traced = TracedHistory::wrap(Box::new(PageHistory::new("https://example.com/")));

        traced
            .push_state(Value::Null, "", "https://example.com/a")
            .unwrap();
        traced
            .replace_state(Value::Null, "", "https://example.com/b")
            .unwrap();

        assert_eq!(traced.current_url(), "https://example.com/b");
        assert_eq!(
            traced.take_mutations(),
            vec![
                HistoryMutation::Push {
                    url: "https://example.com/a".to_string()
                },
                HistoryMutation::Replace {
                    url: "https://example.com/b".to_string()
                },
            ]
        );
        // Drained once, gone.
        assert!(traced.take_mutations().is_empty());
    }

    #[test]
    fn push_drops_forward_entries() {
        let mut history = PageHistory::new("https://example.com/");
        history
            .push_state(Value::Null, "", "https://example.com/a")
            .unwrap();
        history
            .replace_state(Value::Null, "", "https://example.com/a2")
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.current_url(), "https://example.com/a2");
    }

    #[test]
    fn failed_mutation_is_not_recorded() {
        struct Broken;
        impl HistoryOps for Broken {
            fn push_state(&mut self, _: Value, _: &str, _: &str) -> Result<()> {
                Err(anyhow!("history unavailable"))
            }
            fn replace_state(&mut self, _: Value, _: &str, _: &str) -> Result<()> {
                Err(anyhow!("history unavailable"))
            }
            fn current_url(&self) -> &str {
                "about:blank"
            }
        }

        let mut traced = TracedHistory::wrap(Box::new(Broken));
        assert!(traced.push_state(Value::Null, "", "x").is_err());
        assert!(traced.take_mutations().is_empty());
    }
}
