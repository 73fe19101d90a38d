//! Concurrency combinators.
//!
//! The fold engine is single-threaded; these handlers are the only places
//! where parallelism enters a program. Concurrent work runs as independent
//! sub-evaluations (see [`TaskContext::spawn`]) that share no scope or
//! cache with the evaluation that started them. Abandoned branches of
//! `race` and `timeout` keep running until they finish on their own, and
//! their counters are never merged into the caller's state.

use super::{tags, type_name};
use crate::handler::{Awaited, Evaluated, Handler, Resume, Step, Task, TaskContext};
use crate::registry::Registry;
use crate::stats::FoldStats;
use dagfold_core::{FoldError, FoldResult, Lambda, Node, NodeId, Payload, Value};
use futures::future::{join_all, select_all};
use std::time::Duration;
use tracing::debug;

/// Registry with the concurrent `par_map`
#[must_use]
pub fn handlers() -> Registry {
    common().with(tags::PAR_MAP, ParMapHandler { concurrent: true })
}

/// Registry with the one-at-a-time `par_map`
#[must_use]
pub fn reference_handlers() -> Registry {
    common().with(tags::PAR_MAP, ParMapHandler { concurrent: false })
}

fn common() -> Registry {
    Registry::new()
        .with_volatile(tags::RACE, RaceHandler)
        .with_volatile(tags::TIMEOUT, TimeoutHandler)
        .with(tags::RETRY, RetryHandler)
}

struct ParMapHandler {
    concurrent: bool,
}

impl Handler for ParMapHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let Payload::ParMap {
            collection,
            concurrency,
            lambda,
        } = &node.payload
        else {
            return Err(FoldError::invalid_node(id, "expected par_map"));
        };
        Ok(Box::new(ParMapTask {
            collection: *collection,
            batch: (*concurrency).max(1),
            lambda: *lambda,
            concurrent: self.concurrent,
            items: None,
            results: Vec::new(),
        }))
    }
}

struct ParMapTask {
    collection: NodeId,
    batch: usize,
    lambda: Lambda,
    concurrent: bool,
    /// Elements, once the collection has been evaluated
    items: Option<Vec<Value>>,
    results: Vec<Value>,
}

impl ParMapTask {
    fn advance(&mut self, cx: &TaskContext<'_>) -> Step {
        let Some(items) = &self.items else {
            return Step::child(self.collection);
        };
        let done = self.results.len();
        if done == items.len() {
            return Step::Done(Value::from(std::mem::take(&mut self.results)));
        }

        if !self.concurrent {
            return Step::scoped(self.lambda.body, vec![(self.lambda.param, items[done].clone())]);
        }

        let end = (done + self.batch).min(items.len());
        debug!(node = %cx.node(), start = done, end, "par_map batch");
        let batch: Vec<_> = items[done..end]
            .iter()
            .map(|item| cx.spawn(self.lambda.body, vec![(self.lambda.param, item.clone())]))
            .collect();
        Step::wait(Box::pin(async move {
            let outcomes = join_all(batch).await;
            let tainted = outcomes.iter().any(|e| e.tainted);
            let mut stats = FoldStats::default();
            for outcome in &outcomes {
                stats.merge(&outcome.stats);
            }
            let result = outcomes
                .into_iter()
                .map(|e| e.result)
                .collect::<FoldResult<Vec<Value>>>()
                .map(Value::from);
            Awaited::Settled(Evaluated {
                result,
                tainted,
                stats,
            })
        }))
    }
}

impl Task for ParMapTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start => {}
            Resume::Value(value) if self.items.is_none() => match value {
                Value::Array(items) => self.items = Some(items.to_vec()),
                other => {
                    return Step::fail(format!("par_map expects an array, found {}", type_name(&other)));
                }
            },
            Resume::Value(Value::Array(values)) if self.concurrent => self.results.extend(values.iter().cloned()),
            Resume::Value(value) if !self.concurrent => self.results.push(value),
            Resume::Error(err) => return Step::Fail(FoldError::Failed(err)),
            input => return Step::unexpected(cx.node(), &input),
        }
        self.advance(cx)
    }
}

struct RaceHandler;

impl Handler for RaceHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        match &node.payload {
            Payload::Args(branches) if !branches.is_empty() => Ok(Box::new(RaceTask {
                branches: branches.clone(),
            })),
            _ => Err(FoldError::invalid_node(id, "race needs at least one branch")),
        }
    }
}

struct RaceTask {
    branches: Vec<NodeId>,
}

impl Task for RaceTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start => {
                let node = cx.node();
                let contenders: Vec<_> = self.branches.iter().map(|b| cx.spawn(*b, Vec::new())).collect();
                Step::wait(Box::pin(async move {
                    let (winner, index, _abandoned) = select_all(contenders).await;
                    debug!(%node, winner = index, "race settled");
                    Awaited::Settled(winner)
                }))
            }
            Resume::Value(value) => Step::Done(value),
            Resume::Error(err) => Step::Fail(FoldError::Failed(err)),
            Resume::Elapsed => Step::unexpected(cx.node(), &input),
        }
    }
}

struct TimeoutHandler;

impl Handler for TimeoutHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let Payload::Timeout { expr, ms, fallback } = &node.payload else {
            return Err(FoldError::invalid_node(id, "expected timeout"));
        };
        Ok(Box::new(TimeoutTask {
            expr: *expr,
            limit: Duration::from_millis(*ms),
            fallback: *fallback,
        }))
    }
}

struct TimeoutTask {
    expr: NodeId,
    limit: Duration,
    fallback: NodeId,
}

impl Task for TimeoutTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start => {
                let work = cx.spawn(self.expr, Vec::new());
                let limit = self.limit;
                Step::wait(Box::pin(async move {
                    match tokio::time::timeout(limit, work).await {
                        Ok(evaluated) => Awaited::Settled(evaluated),
                        Err(_) => Awaited::Elapsed,
                    }
                }))
            }
            Resume::Elapsed => {
                debug!(node = %cx.node(), limit_ms = self.limit.as_millis() as u64, "deadline passed, using fallback");
                Step::child(self.fallback)
            }
            Resume::Value(value) => Step::Done(value),
            Resume::Error(err) => Step::Fail(FoldError::Failed(err)),
        }
    }
}

struct RetryHandler;

impl Handler for RetryHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let Payload::Retry {
            expr,
            attempts,
            delay_ms,
        } = &node.payload
        else {
            return Err(FoldError::invalid_node(id, "expected retry"));
        };
        Ok(Box::new(RetryTask {
            expr: *expr,
            attempts: (*attempts).max(1),
            delay: Duration::from_millis(*delay_ms),
            attempt: 0,
        }))
    }
}

struct RetryTask {
    expr: NodeId,
    attempts: u32,
    delay: Duration,
    attempt: u32,
}

impl RetryTask {
    fn next_attempt(&mut self) -> Step {
        self.attempt += 1;
        Step::fresh(self.expr)
    }
}

impl Task for RetryTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start | Resume::Elapsed => self.next_attempt(),
            Resume::Value(value) => Step::Done(value),
            Resume::Error(err) if self.attempt >= self.attempts => {
                debug!(node = %cx.node(), attempts = self.attempts, "retry exhausted");
                Step::Fail(FoldError::Failed(err))
            }
            Resume::Error(_) if self.delay.is_zero() => self.next_attempt(),
            Resume::Error(_) => {
                let delay = self.delay;
                Step::wait(Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    Awaited::Elapsed
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{standard, standard_reference};
    use crate::state::FoldState;
    use crate::test_support::{Program, counting, flaky, registry};
    use dagfold_core::ParamId;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Evaluates its child, then holds the value for `ms` (or the value
    /// itself, in milliseconds, when `ms` is `None`)
    struct Delay {
        ms: Option<u64>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Delay {
        fn fixed(ms: u64) -> Self {
            Self {
                ms: Some(ms),
                active: Arc::default(),
                peak: Arc::default(),
            }
        }

        fn by_value() -> Self {
            Self {
                ms: None,
                active: Arc::default(),
                peak: Arc::default(),
            }
        }
    }

    impl Handler for Delay {
        fn start(&self, _id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
            Ok(Box::new(DelayTask {
                child: match node.payload {
                    Payload::Child(child) => Some(child),
                    _ => None,
                },
                ms: self.ms,
                active: Arc::clone(&self.active),
                peak: Arc::clone(&self.peak),
                held: false,
            }))
        }
    }

    struct DelayTask {
        child: Option<NodeId>,
        ms: Option<u64>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        held: bool,
    }

    impl DelayTask {
        fn hold(&mut self, value: Value) -> Step {
            self.held = true;
            let ms = self.ms.unwrap_or_else(|| value.as_u64().unwrap_or(0));
            let active = Arc::clone(&self.active);
            let peak = Arc::clone(&self.peak);
            Step::wait(Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Awaited::Settled(Evaluated::value(value))
            }))
        }
    }

    impl Task for DelayTask {
        fn resume(&mut self, _cx: &TaskContext<'_>, input: Resume) -> Step {
            match (input, self.held) {
                (Resume::Start, _) => match self.child {
                    Some(child) => Step::child(child),
                    None => self.hold(Value::from("slow")),
                },
                (Resume::Value(value), false) => self.hold(value),
                (Resume::Value(value), true) => Step::Done(value),
                (Resume::Error(err), _) => Step::Fail(FoldError::Failed(err)),
                (Resume::Elapsed, _) => Step::fail("unexpected timer"),
            }
        }
    }

    fn par_map(p: &mut Program, items: serde_json::Value, concurrency: usize, param: ParamId, body: NodeId) -> NodeId {
        let collection = p.lit(items);
        p.add(
            tags::PAR_MAP,
            Payload::ParMap {
                collection,
                concurrency,
                lambda: Lambda::new(param, body),
            },
        )
    }

    #[tokio::test]
    async fn test_par_map_both_variants() {
        for base in [registry(), registry().union(reference_handlers())] {
            let x = ParamId::fresh();
            let mut p = Program::new();
            let x_ref = p.param(x);
            let ten = p.lit(json!(10));
            let body = p.add("math/add", Payload::Args(vec![x_ref, ten]));
            let root = par_map(&mut p, json!([1, 2, 3, 4, 5]), 2, x, body);
            let engine = p.engine(base);
            assert_eq!(engine.fold_fresh(root).await.unwrap(), json!([11, 12, 13, 14, 15]));
        }
    }

    #[tokio::test]
    async fn test_par_map_preserves_input_order() {
        let x = ParamId::fresh();
        let mut p = Program::new();
        let x_ref = p.param(x);
        let body = p.add("test/delay", Payload::Child(x_ref));
        let root = par_map(&mut p, json!([40, 30, 20, 10, 0]), 5, x, body);
        let engine = p.engine(registry().with("test/delay", Delay::by_value()));
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!([40, 30, 20, 10, 0]));
    }

    #[tokio::test]
    async fn test_par_map_respects_batch_bound() {
        let x = ParamId::fresh();
        let mut p = Program::new();
        let x_ref = p.param(x);
        let body = p.add("test/delay", Payload::Child(x_ref));
        let root = par_map(&mut p, json!([1, 2, 3, 4, 5, 6]), 2, x, body);
        let delay = Delay::fixed(10);
        let peak = Arc::clone(&delay.peak);
        let engine = p.engine(registry().with("test/delay", delay));
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!([1, 2, 3, 4, 5, 6]));
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency {peak}");
    }

    #[tokio::test]
    async fn test_reference_par_map_runs_one_at_a_time() {
        let x = ParamId::fresh();
        let mut p = Program::new();
        let x_ref = p.param(x);
        let body = p.add("test/delay", Payload::Child(x_ref));
        let root = par_map(&mut p, json!([1, 2, 3, 4]), 4, x, body);
        let delay = Delay::fixed(1);
        let peak = Arc::clone(&delay.peak);
        let engine = p.engine(standard_reference().with("test/delay", delay));
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!([1, 2, 3, 4]));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_par_map_zero_concurrency_and_empty_collection() {
        let x = ParamId::fresh();
        let mut p = Program::new();
        let x_ref = p.param(x);
        let zero = par_map(&mut p, json!(["a", "b"]), 0, x, x_ref);
        let empty = par_map(&mut p, json!([]), 3, x, x_ref);
        let engine = p.engine(standard());
        assert_eq!(engine.fold_fresh(zero).await.unwrap(), json!(["a", "b"]));
        assert_eq!(engine.fold_fresh(empty).await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_par_map_rejects_non_array() {
        let x = ParamId::fresh();
        let mut p = Program::new();
        let x_ref = p.param(x);
        let root = par_map(&mut p, json!(5), 1, x, x_ref);
        let engine = p.engine(standard());
        assert_eq!(
            engine.fold_fresh(root).await.unwrap_err(),
            FoldError::failed("par_map expects an array, found number")
        );
    }

    #[tokio::test]
    async fn test_par_map_first_failure_in_input_order() {
        for base in [standard(), standard_reference()] {
            let x = ParamId::fresh();
            let mut p = Program::new();
            let x_ref = p.param(x);
            let body = p.fail(x_ref);
            let root = par_map(&mut p, json!(["a", "b", "c"]), 3, x, body);
            let engine = p.engine(base);
            assert_eq!(engine.fold_fresh(root).await.unwrap_err(), FoldError::failed("a"));
        }
    }

    #[tokio::test]
    async fn test_par_map_body_sees_enclosing_bindings() {
        let outer = ParamId::fresh();
        let x = ParamId::fresh();
        let mut p = Program::new();
        let outer_ref = p.param(outer);
        let x_ref = p.param(x);
        let body = p.add("math/add", Payload::Args(vec![outer_ref, x_ref]));
        let mapped = par_map(&mut p, json!([1, 2]), 2, x, body);
        let hundred = p.lit(json!(100));
        let root = p.apply(hundred, outer, mapped);
        let engine = p.engine(registry());
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!([101, 102]));
    }

    #[tokio::test]
    async fn test_race_first_to_settle_wins() {
        let mut p = Program::new();
        let slow = p.add("test/slow", Payload::Empty);
        let fast = p.lit(json!("fast"));
        let root = p.add(tags::RACE, Payload::Args(vec![slow, fast]));
        let engine = p.engine(standard().with("test/slow", Delay::fixed(500)));
        let mut state = FoldState::new();
        assert_eq!(engine.fold(root, &mut state).await.unwrap(), json!("fast"));
        assert!(state.is_tainted(root));
    }

    #[tokio::test]
    async fn test_race_does_not_wait_for_loser() {
        let mut p = Program::new();
        let slow = p.add("test/slow", Payload::Empty);
        let fast = p.lit("fast");
        let root = p.add(tags::RACE, Payload::Args(vec![slow, fast]));
        let engine = p.engine(standard().with("test/slow", Delay::fixed(500)));

        let started = Instant::now();
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!("fast"));
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(250), "race took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_race_failure_can_win() {
        let mut p = Program::new();
        let slow = p.add("test/slow", Payload::Empty);
        let message = p.lit(json!("lost"));
        let failing = p.fail(message);
        let root = p.add(tags::RACE, Payload::Args(vec![slow, failing]));
        let engine = p.engine(standard().with("test/slow", Delay::fixed(500)));
        assert_eq!(engine.fold_fresh(root).await.unwrap_err(), FoldError::failed("lost"));
    }

    #[tokio::test]
    async fn test_race_without_branches_is_invalid() {
        let mut p = Program::new();
        let root = p.add(tags::RACE, Payload::Args(Vec::new()));
        let engine = p.engine(standard());
        assert!(matches!(
            engine.fold_fresh(root).await,
            Err(FoldError::InvalidNode { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_uses_fallback_on_expiry() {
        let mut p = Program::new();
        let slow = p.add("test/slow", Payload::Empty);
        let fallback = p.lit(json!("fallback"));
        let root = p.add(tags::TIMEOUT, Payload::Timeout { expr: slow, ms: 10, fallback });
        let engine = p.engine(standard().with("test/slow", Delay::fixed(500)));
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!("fallback"));
    }

    #[tokio::test]
    async fn test_timeout_returns_value_in_time() {
        let mut p = Program::new();
        let quick = p.lit(json!("quick"));
        let fallback = p.lit(json!("fallback"));
        let root = p.add(tags::TIMEOUT, Payload::Timeout { expr: quick, ms: 5_000, fallback });
        let engine = p.engine(standard());
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!("quick"));
    }

    #[tokio::test]
    async fn test_timeout_propagates_early_failure() {
        let mut p = Program::new();
        let message = p.lit("broken");
        let failing = p.fail(message);
        let fallback = p.lit("fallback");
        let root = p.add(tags::TIMEOUT, Payload::Timeout { expr: failing, ms: 5_000, fallback });
        let engine = p.engine(standard());

        let started = Instant::now();
        assert_eq!(engine.fold_fresh(root).await.unwrap_err(), FoldError::failed("broken"));
        assert!(started.elapsed() < Duration::from_millis(2_500));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let (handler, runs) = flaky(2);
        let mut p = Program::new();
        let expr = p.add("test/flaky", Payload::Empty);
        let root = p.add(tags::RETRY, Payload::Retry { expr, attempts: 5, delay_ms: 0 });
        let engine = p.engine(standard().with("test/flaky", handler));
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!("success"));
        assert_eq!(runs.get(expr), 3);
    }

    #[tokio::test]
    async fn test_retry_waits_between_attempts() {
        let (handler, runs) = flaky(2);
        let mut p = Program::new();
        let expr = p.add("test/flaky", Payload::Empty);
        let root = p.add(tags::RETRY, Payload::Retry { expr, attempts: 5, delay_ms: 50 });
        let engine = p.engine(standard().with("test/flaky", handler));

        let started = Instant::now();
        assert_eq!(engine.fold_fresh(root).await.unwrap(), json!("success"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "retry took {elapsed:?}");
        assert_eq!(runs.get(expr), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_surfaces_last_error() {
        let (handler, runs) = flaky(usize::MAX);
        let mut p = Program::new();
        let expr = p.add("test/flaky", Payload::Empty);
        let root = p.add(tags::RETRY, Payload::Retry { expr, attempts: 3, delay_ms: 1 });
        let engine = p.engine(standard().with("test/flaky", handler));
        assert_eq!(
            engine.fold_fresh(root).await.unwrap_err(),
            FoldError::failed("attempt 3 failed")
        );
        assert_eq!(runs.get(expr), 3);
    }

    #[tokio::test]
    async fn test_retry_zero_attempts_runs_once() {
        let (handler, runs) = flaky(usize::MAX);
        let mut p = Program::new();
        let expr = p.add("test/flaky", Payload::Empty);
        let root = p.add(tags::RETRY, Payload::Retry { expr, attempts: 0, delay_ms: 0 });
        let engine = p.engine(standard().with("test/flaky", handler));
        assert!(engine.fold_fresh(root).await.is_err());
        assert_eq!(runs.total(), 1);
    }

    #[tokio::test]
    async fn test_retry_subtree_is_fresh_but_outside_is_cached() {
        let (pure, pure_runs) = counting(crate::handler::leaf(|_, _| Ok(Value::from("pure"))));
        let (flaky_handler, _) = flaky(2);
        let mut p = Program::new();
        let outside = p.add("test/pure", Payload::Empty);
        let inside = p.add("test/pure", Payload::Empty);
        let failing = p.add("test/flaky", Payload::Empty);
        let body = p.list(&[inside, failing]);
        let retried = p.add(tags::RETRY, Payload::Retry { expr: body, attempts: 5, delay_ms: 0 });
        let root = p.list(&[outside, retried, outside]);

        let engine = p.engine(standard().with("test/pure", pure).with("test/flaky", flaky_handler));
        let mut state = FoldState::new();
        assert_eq!(
            engine.fold(root, &mut state).await.unwrap(),
            json!(["pure", ["pure", "success"], "pure"])
        );
        assert_eq!(pure_runs.get(inside), 3);
        assert_eq!(pure_runs.get(outside), 1);
        assert!(!state.is_cached(inside));
        assert!(state.is_cached(retried));

        engine.fold(root, &mut state).await.unwrap();
        assert_eq!(pure_runs.get(outside), 1);
        assert_eq!(pure_runs.get(inside), 3);
    }
}
