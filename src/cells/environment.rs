//! The facade applications use to run a cell network.
//!
//! An [`Environment`] owns one registry and fronts every operation of the
//! network: starting and stopping cells, wiring subscriptions, emitting
//! events, and the request/response pattern.
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use hive::{topics, Behavior, CellError, Context, Environment, Event, Payload, Value};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Behavior for Echo {
//!     async fn init(&mut self, _ctx: &Context<'_>) -> Result<(), CellError> { Ok(()) }
//!     async fn terminate(&mut self) -> Result<(), CellError> { Ok(()) }
//!     async fn recover(&mut self, _reason: &CellError) -> Result<(), CellError> { Ok(()) }
//!
//!     async fn process_event(&mut self, event: Event, _ctx: &Context<'_>) -> Result<(), CellError> {
//!         if event.topic() == topics::PING {
//!             event.respond(Ok(Value::Text(topics::PONG.into())))?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> Result<(), CellError> {
//! let env = Environment::new();
//! env.start_cell("echo", Box::new(Echo)).await?;
//! let pong = env
//!     .request("echo", topics::PING, Payload::empty(), Duration::from_secs(2))
//!     .await?;
//! assert_eq!(pong, Value::Text(topics::PONG.into()));
//! env.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time;
use tracing::debug;

use crate::cells::behavior::Behavior;
use crate::cells::event::{topics, Event, Payload, ReplySlot, Value};
use crate::cells::registry::Registry;
use crate::error::CellError;

/// Cheap cloneable facade over one cell network.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

struct EnvInner {
    id: Arc<str>,
    registry: Registry,
}

impl Environment {
    /// Creates an environment with a generated random id.
    pub fn new() -> Environment {
        Self::with_id(generate_id())
    }

    /// Creates an environment with a caller-supplied id.
    pub fn with_id(id: impl Into<Arc<str>>) -> Environment {
        let id = id.into();
        debug!(environment = %id, "environment created");
        Environment {
            inner: Arc::new(EnvInner {
                registry: Registry::new(Arc::clone(&id)),
                id,
            }),
        }
    }

    /// Returns the environment id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Starts a cell running `behavior` under `id`.
    ///
    /// Fails with [`CellError::DuplicateId`] when the id is taken. Blocks
    /// until the behavior's `init` has run.
    pub async fn start_cell(&self, id: &str, behavior: Box<dyn Behavior>) -> Result<(), CellError> {
        self.inner.registry.start_cell(id, behavior).await
    }

    /// Stops a cell: unwires it from the graph, runs the behavior's
    /// `terminate`, and surfaces the cell worker's terminal error.
    pub async fn stop_cell(&self, id: &str) -> Result<(), CellError> {
        self.inner.registry.stop_cell(id).await
    }

    /// Returns `true` when a cell with this id exists.
    pub async fn has_cell(&self, id: &str) -> bool {
        self.inner.registry.has_cell(id).await
    }

    /// Subscribes `subscriber_ids` to the emitter's events.
    pub async fn subscribe(
        &self,
        emitter_id: &str,
        subscriber_ids: &[&str],
    ) -> Result<(), CellError> {
        self.inner.registry.subscribe(emitter_id, subscriber_ids).await
    }

    /// Removes `subscriber_ids` from the emitter's subscriber set.
    pub async fn unsubscribe(
        &self,
        emitter_id: &str,
        subscriber_ids: &[&str],
    ) -> Result<(), CellError> {
        self.inner
            .registry
            .unsubscribe(emitter_id, subscriber_ids)
            .await
    }

    /// Returns the emitter's subscriber ids, sorted.
    pub async fn subscribers(&self, id: &str) -> Result<Vec<String>, CellError> {
        self.inner.registry.subscribers(id).await
    }

    /// Delivers an event into a cell's mailbox (timeout-bounded).
    pub async fn emit(&self, id: &str, event: Event) -> Result<(), CellError> {
        self.inner.registry.handle(id).await?.emit(event).await
    }

    /// Builds an event from topic and payload, then delivers it.
    pub async fn emit_new(
        &self,
        id: &str,
        topic: impl Into<String>,
        payload: Payload,
    ) -> Result<(), CellError> {
        let event = Event::new(topic, payload)?;
        self.emit(id, event).await
    }

    /// Emits an event carrying a one-shot reply slot and awaits the answer.
    ///
    /// The slot travels inside the payload under [`topics::KEY_REPLY`]; the
    /// target behavior answers via [`Event::respond`]. Delivery errors, a
    /// missing reply, an elapsed timeout, and an `Err` reply all surface
    /// uniformly as this method's error.
    pub async fn request(
        &self,
        id: &str,
        topic: impl Into<String>,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Value, CellError> {
        let (slot, reply_rx) = ReplySlot::new();
        let payload = payload.apply([(topics::KEY_REPLY, Value::Reply(slot))]);
        self.emit_new(id, topic, payload).await?;

        match time::timeout(timeout, reply_rx).await {
            Err(_elapsed) => Err(CellError::RequestTimeout {
                id: id.to_string(),
                timeout,
            }),
            Ok(Err(_dropped)) => Err(CellError::NoReply { id: id.to_string() }),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
        }
    }

    /// Stops every cell in the environment.
    ///
    /// All cells are attempted; the first stop error is returned.
    pub async fn stop(&self) -> Result<(), CellError> {
        debug!(environment = %self.inner.id, "environment stopping");
        self.inner.registry.stop_all().await
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.inner.id)
            .finish()
    }
}

/// Random alphanumeric token for environments created without an id.
fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..10)
        .map(|_| char::from(rng.sample(rand::distr::Alphanumeric)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::behavior::Context;
    use crate::config::BehaviorOptions;
    use async_trait::async_trait;

    /// On `"iterate!!"`, tells every subscriber who loves it.
    struct IterateBehavior;

    #[async_trait]
    impl Behavior for IterateBehavior {
        async fn init(&mut self, _ctx: &Context<'_>) -> Result<(), CellError> {
            Ok(())
        }

        async fn terminate(&mut self) -> Result<(), CellError> {
            Ok(())
        }

        async fn process_event(
            &mut self,
            event: Event,
            ctx: &Context<'_>,
        ) -> Result<(), CellError> {
            if event.topic() != "iterate!!" {
                return Ok(());
            }
            for subscriber in ctx.subscribers() {
                let text = format!("{} loves {}", ctx.cell_id(), subscriber.id());
                subscriber
                    .emit_new("love", Payload::new([("text", text)]))
                    .await?;
            }
            Ok(())
        }

        async fn recover(&mut self, _reason: &CellError) -> Result<(), CellError> {
            Ok(())
        }
    }

    /// Collects `"love"` payload texts; answers `processed?` requests.
    #[derive(Default)]
    struct CollectBehavior {
        collected: Vec<String>,
    }

    #[async_trait]
    impl Behavior for CollectBehavior {
        async fn init(&mut self, _ctx: &Context<'_>) -> Result<(), CellError> {
            Ok(())
        }

        async fn terminate(&mut self) -> Result<(), CellError> {
            Ok(())
        }

        async fn process_event(
            &mut self,
            event: Event,
            _ctx: &Context<'_>,
        ) -> Result<(), CellError> {
            match event.topic() {
                "love" => {
                    if let Some(text) = event.payload().text("text") {
                        self.collected.push(text.to_string());
                    }
                    Ok(())
                }
                topics::PROCESSED => {
                    let list = Value::List(
                        self.collected
                            .iter()
                            .map(|t| Value::Text(t.clone()))
                            .collect(),
                    );
                    event.respond(Ok(list))
                }
                topics::RESET => {
                    self.collected.clear();
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        async fn recover(&mut self, _reason: &CellError) -> Result<(), CellError> {
            Ok(())
        }
    }

    /// Sleeps practically forever on every event; tight mailbox.
    struct SleepyBehavior;

    #[async_trait]
    impl Behavior for SleepyBehavior {
        fn options(&self) -> BehaviorOptions {
            BehaviorOptions {
                mailbox_capacity: 16,
                emit_timeout: Duration::from_secs(2),
                ..BehaviorOptions::default()
            }
        }

        async fn init(&mut self, _ctx: &Context<'_>) -> Result<(), CellError> {
            Ok(())
        }

        async fn terminate(&mut self) -> Result<(), CellError> {
            Ok(())
        }

        async fn process_event(
            &mut self,
            _event: Event,
            _ctx: &Context<'_>,
        ) -> Result<(), CellError> {
            time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn recover(&mut self, _reason: &CellError) -> Result<(), CellError> {
            Ok(())
        }
    }

    async fn collected_of(env: &Environment, id: &str) -> Vec<Value> {
        for _ in 0..200 {
            let value = env
                .request(id, topics::PROCESSED, Payload::empty(), Duration::from_secs(5))
                .await
                .expect("request");
            match value.as_list() {
                Some(list) if !list.is_empty() => return list.to_vec(),
                _ => time::sleep(Duration::from_millis(10)).await,
            }
        }
        panic!("cell {id} never collected anything");
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_emits_and_collects() {
        let env = Environment::with_id("valentine");
        env.start_cell("foo", Box::new(IterateBehavior))
            .await
            .expect("start foo");
        env.start_cell("bar", Box::new(CollectBehavior::default()))
            .await
            .expect("start bar");
        env.start_cell("baz", Box::new(CollectBehavior::default()))
            .await
            .expect("start baz");
        env.subscribe("foo", &["bar", "baz"]).await.expect("wire");

        env.emit_new("foo", "iterate!!", Payload::empty())
            .await
            .expect("emit");

        // Exactly one collected event per subscriber, rendered as
        // "<emitter> loves <subscriber>".
        assert_eq!(
            collected_of(&env, "bar").await,
            vec![Value::Text("foo loves bar".into())]
        );
        assert_eq!(
            collected_of(&env, "baz").await,
            vec![Value::Text("foo loves baz".into())]
        );

        env.stop().await.expect("stop");
        assert!(!env.has_cell("foo").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_collected_state() {
        let env = Environment::with_id("resettable");
        env.start_cell("foo", Box::new(IterateBehavior))
            .await
            .expect("start foo");
        env.start_cell("bar", Box::new(CollectBehavior::default()))
            .await
            .expect("start bar");
        env.subscribe("foo", &["bar"]).await.expect("wire");

        env.emit_new("foo", "iterate!!", Payload::empty())
            .await
            .expect("emit");
        assert_eq!(collected_of(&env, "bar").await.len(), 1);

        env.emit_new("bar", topics::RESET, Payload::empty())
            .await
            .expect("reset");
        for _ in 0..200 {
            let value = env
                .request("bar", topics::PROCESSED, Payload::empty(), Duration::from_secs(5))
                .await
                .expect("request");
            if value.as_list().is_some_and(|l| l.is_empty()) {
                env.stop().await.expect("stop");
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("reset never took effect");
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_mailbox_times_out_not_hangs() {
        let env = Environment::with_id("pressure");
        env.start_cell("sleepy", Box::new(SleepyBehavior))
            .await
            .expect("start sleepy");

        let mut timeouts = 0;
        for n in 0..25 {
            match env
                .emit_new("sleepy", format!("flood-{n}"), Payload::empty())
                .await
            {
                Ok(()) => {}
                Err(CellError::MailboxTimeout { id, timeout }) => {
                    assert_eq!(id, "sleepy");
                    assert_eq!(timeout, Duration::from_secs(2));
                    timeouts += 1;
                }
                Err(other) => panic!("unexpected delivery error: {other}"),
            }
        }
        assert!(timeouts >= 1, "no emit ever timed out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_without_reply() {
        let env = Environment::with_id("silent");
        env.start_cell("mute", Box::new(CollectBehavior::default()))
            .await
            .expect("start mute");

        // "love" is processed but never answered, so the slot is dropped
        // or the timeout fires first.
        let err = env
            .request("mute", "love", Payload::empty(), Duration::from_secs(1))
            .await
            .expect_err("no reply ever comes");
        assert!(matches!(
            err,
            CellError::RequestTimeout { .. } | CellError::NoReply { .. }
        ));
        env.stop().await.expect("stop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reply_surfaces_as_request_error() {
        /// Answers every request with an error.
        struct GrumpyBehavior;

        #[async_trait]
        impl Behavior for GrumpyBehavior {
            async fn init(&mut self, _ctx: &Context<'_>) -> Result<(), CellError> {
                Ok(())
            }

            async fn terminate(&mut self) -> Result<(), CellError> {
                Ok(())
            }

            async fn process_event(
                &mut self,
                event: Event,
                _ctx: &Context<'_>,
            ) -> Result<(), CellError> {
                event.respond(Err(CellError::failed("go away")))
            }

            async fn recover(&mut self, _reason: &CellError) -> Result<(), CellError> {
                Ok(())
            }
        }

        let env = Environment::with_id("grumpy");
        env.start_cell("grump", Box::new(GrumpyBehavior))
            .await
            .expect("start grump");

        let err = env
            .request("grump", topics::PING, Payload::empty(), Duration::from_secs(5))
            .await
            .expect_err("error reply");
        assert_eq!(err, CellError::failed("go away"));
        env.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_unknown_target_is_structural_error() {
        let env = Environment::with_id("empty");
        let err = env
            .emit_new("ghost", topics::PING, Payload::empty())
            .await
            .expect_err("unknown id");
        assert_eq!(err, CellError::UnknownId { id: "ghost".into() });
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = Environment::new();
        let b = Environment::new();
        assert_eq!(a.id().len(), 10);
        assert_ne!(a.id(), b.id());
    }
}
