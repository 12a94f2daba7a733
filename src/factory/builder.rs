use std::sync::Arc;

use crate::config::LineConfig;
use crate::context::LineContext;
use crate::devices::{DeviceHandler, DeviceRegistry};
use crate::factory::line::Factory;
use crate::process::{ProcessEngine, ProductionMetrics};
use crate::scada::ScadaMonitor;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for a [`Factory`].
pub struct FactoryBuilder {
    cfg: LineConfig,
    context: Option<LineContext>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl FactoryBuilder {
    pub fn new(cfg: LineConfig) -> Self {
        Self {
            cfg,
            context: None,
            subscribers: Vec::new(),
        }
    }

    /// Uses caller-provided protocol handles instead of the in-memory ones.
    pub fn with_context(mut self, ctx: LineContext) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Sets event subscribers.
    ///
    /// Each subscriber gets its own worker and bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Wires devices, PLCs, SCADA and the engine. Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<Factory> {
        let cfg = self.cfg;
        let ctx = self
            .context
            .unwrap_or_else(|| LineContext::in_memory(&cfg));
        let subs = Arc::new(SubscriberSet::new(self.subscribers, ctx.bus.clone()));

        let scada = ScadaMonitor::new(
            cfg.scada.clone(),
            Arc::clone(&ctx.variables),
            Arc::clone(&ctx.broker),
            ctx.bus.clone(),
        );
        let registry = Arc::new(DeviceRegistry::from_layout(&cfg.layout));
        let handler = Arc::new(DeviceHandler::new(
            &ctx,
            &cfg.simulation,
            registry,
            Arc::clone(&scada),
        ));
        let metrics = ProductionMetrics::default();
        let engine = Arc::new(ProcessEngine::new(
            &cfg,
            Arc::clone(&handler),
            ctx.bus.clone(),
            metrics.clone(),
        ));

        let factory = Arc::new(Factory::new_internal(
            cfg, ctx, scada, handler, engine, metrics, subs,
        ));
        factory.subscriber_listener();
        factory
    }
}
