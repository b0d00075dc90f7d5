//! Line commands for driving a tracker from a terminal.

use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use crate::{
    models::{ContentType, TrackingKey},
    store::{CounterStore, IdentityProvider},
};

use super::{time_totals, ActivityTracker, VisibilityRelay};

pub const HELP: &str = "commands: start | pause | resume | reset | flush | hide | show | status \
| bind <chapter|quiz|exercise> <id> [chapter-id] | unbind | totals <type> <id>... | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Reset,
    Flush,
    Hide,
    Show,
    Status,
    Bind(TrackingKey),
    Unbind,
    Totals {
        content_type: ContentType,
        content_ids: Vec<String>,
    },
    Help,
    Quit,
}

/// Parses `<type> <id> [chapter-id]`.
pub fn parse_key<'a>(mut args: impl Iterator<Item = &'a str>) -> Result<TrackingKey> {
    let content_type: ContentType = args
        .next()
        .ok_or_else(|| anyhow!("missing content type"))?
        .parse()?;
    let content_id = args.next().ok_or_else(|| anyhow!("missing content id"))?;

    let mut key = TrackingKey::new(content_type, content_id);
    if let Some(chapter_id) = args.next() {
        key = key.with_chapter(chapter_id);
    }
    if args.next().is_some() {
        bail!("too many arguments");
    }
    Ok(key)
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;

        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "reset" => Command::Reset,
            "flush" => Command::Flush,
            "hide" => Command::Hide,
            "show" => Command::Show,
            "status" => Command::Status,
            "unbind" => Command::Unbind,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "bind" => {
                return parse_key(words)
                    .map(Command::Bind)
                    .context("usage: bind <chapter|quiz|exercise> <id> [chapter-id]");
            }
            "totals" => {
                let content_type: ContentType = words
                    .next()
                    .ok_or_else(|| anyhow!("usage: totals <type> <id>..."))?
                    .parse()?;
                let content_ids: Vec<String> = words.map(str::to_string).collect();
                return Ok(Command::Totals {
                    content_type,
                    content_ids,
                });
            }
            other => bail!("unknown command '{other}'"),
        };

        if words.next().is_some() {
            bail!("'{verb}' takes no arguments");
        }
        Ok(command)
    }
}

pub enum Outcome {
    /// Keep reading; print the payload if any.
    Continue(Option<String>),
    Quit,
}

/// Everything a console session needs to act on commands.
pub struct Console<S: CounterStore, I: IdentityProvider> {
    pub tracker: ActivityTracker<S, I>,
    pub relay: VisibilityRelay,
    store: Arc<S>,
    identity: Arc<I>,
}

impl<S: CounterStore, I: IdentityProvider> Console<S, I> {
    pub fn new(
        tracker: ActivityTracker<S, I>,
        relay: VisibilityRelay,
        store: Arc<S>,
        identity: Arc<I>,
    ) -> Self {
        tracker.follow_visibility(&relay);
        Self {
            tracker,
            relay,
            store,
            identity,
        }
    }

    fn status(&self) -> Result<Option<String>> {
        Ok(Some(serde_json::to_string(&self.tracker.snapshot())?))
    }

    pub async fn handle_line(&self, line: &str) -> Result<Outcome> {
        if line.trim().is_empty() {
            return Ok(Outcome::Continue(None));
        }
        let command: Command = line.parse()?;
        self.execute(command).await
    }

    pub async fn execute(&self, command: Command) -> Result<Outcome> {
        let output = match command {
            Command::Start => {
                self.tracker.start();
                self.status()?
            }
            Command::Pause => {
                self.tracker.pause();
                self.status()?
            }
            Command::Resume => {
                self.tracker.resume();
                self.status()?
            }
            Command::Reset => {
                self.tracker.reset();
                self.status()?
            }
            Command::Flush => {
                self.tracker.flush();
                self.tracker.wait_for_flushes().await;
                self.status()?
            }
            Command::Hide => {
                self.relay.set_hidden(true);
                None
            }
            Command::Show => {
                self.relay.set_hidden(false);
                None
            }
            Command::Status => self.status()?,
            Command::Bind(key) => {
                self.tracker.bind(key).await;
                self.status()?
            }
            Command::Unbind => {
                self.tracker.unbind();
                self.status()?
            }
            Command::Totals {
                content_type,
                content_ids,
            } => {
                // Make sure pending seconds are visible in the badges.
                self.tracker.wait_for_flushes().await;
                let owner = self.identity.current_owner().await.unwrap_or(None);
                let totals =
                    time_totals(&*self.store, owner.as_ref(), content_type, &content_ids).await;
                Some(serde_json::to_string(&json!({
                    "contentType": content_type,
                    "totals": totals,
                }))?)
            }
            Command::Help => Some(HELP.to_string()),
            Command::Quit => return Ok(Outcome::Quit),
        };
        Ok(Outcome::Continue(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OwnerId;
    use crate::store::{MemoryStore, StaticIdentity};
    use crate::timer::{ManualScheduler, TrackerConfig, TrackerPhase};
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_simple_verbs() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!("  PAUSE ".parse::<Command>().unwrap(), Command::Pause);
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
        assert!("start now".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn parses_bind_and_totals() {
        assert_eq!(
            "bind quiz q7 ch2".parse::<Command>().unwrap(),
            Command::Bind(TrackingKey::quiz("q7").with_chapter("ch2"))
        );
        assert!("bind quiz".parse::<Command>().is_err());
        assert!("bind lesson l1".parse::<Command>().is_err());
        assert!("bind quiz q1 c1 extra".parse::<Command>().is_err());

        assert_eq!(
            "totals chapter a b".parse::<Command>().unwrap(),
            Command::Totals {
                content_type: ContentType::Chapter,
                content_ids: vec!["a".into(), "b".into()],
            }
        );
    }

    #[tokio::test]
    async fn console_drives_the_tracker() {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(StaticIdentity::signed_in("u1"));
        let clock = Arc::new(ManualScheduler::default());
        let tracker = ActivityTracker::new(
            store.clone(),
            identity.clone(),
            clock.clone(),
            TrackerConfig::default(),
        );
        let console = Console::new(tracker, VisibilityRelay::default(), store.clone(), identity);

        console.handle_line("bind chapter c1").await.unwrap();
        clock.advance(8);
        console.handle_line("flush").await.unwrap();

        let Outcome::Continue(Some(output)) = console.handle_line("totals chapter c1 c2").await.unwrap() else {
            panic!("expected totals output");
        };
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["totals"]["c1"], 8);
        assert_eq!(value["totals"]["c2"], 0);

        console.handle_line("pause").await.unwrap();
        assert_eq!(console.tracker.phase(), TrackerPhase::Paused);
        assert!(matches!(console.handle_line("quit").await.unwrap(), Outcome::Quit));
        assert_eq!(store.total(&OwnerId::new("u1"), ContentType::Chapter, "c1"), Some(8));
    }
}
