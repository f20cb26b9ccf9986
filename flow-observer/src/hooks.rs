//! Interception points of the observer pipeline
//!
//! Hooks are registered per stage when the options are built and never change
//! afterwards. Within a stage they run in registration order; the first hook
//! that returns anything other than [`Control::Continue`], or fails, ends the
//! stage for that item.

use crate::errors::{HookError, HookStage, ObserverError};
use crate::events::MonitorEvent;
use crate::flow::Flow;
use crate::query::{Context, GetFlowsRequest};
use crate::server::LocalObserverServer;
use log::debug;
use std::sync::Arc;

/// Signal returned by a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Control {
    /// Hand the item to the next hook.
    #[default]
    Continue,
    /// Stop processing the item; it is dropped.
    Stop,
    /// Leave the item out; later hooks are not consulted.
    Skip,
}

impl Control {
    pub fn is_continue(&self) -> bool {
        matches!(self, Control::Continue)
    }
}

pub trait OnServerInit: Send + Sync {
    fn on_server_init(&self, server: &LocalObserverServer) -> Result<(), HookError>;
}

pub trait OnMonitorEvent: Send + Sync {
    fn on_monitor_event(&self, ctx: &Context, event: &MonitorEvent) -> Result<Control, HookError>;
}

pub trait OnDecodedFlow: Send + Sync {
    fn on_decoded_flow(&self, ctx: &Context, flow: &Flow) -> Result<Control, HookError>;
}

pub trait OnFlowDelivery: Send + Sync {
    fn on_flow_delivery(&self, ctx: &Context, flow: &Flow) -> Result<Control, HookError>;
}

/// Runs once per flows query; the returned context is what that query's
/// delivery hooks see.
pub trait OnGetFlows: Send + Sync {
    fn on_get_flows(&self, ctx: Context, request: &GetFlowsRequest) -> Result<Context, HookError>;
}

impl<F> OnServerInit for F
where
    F: Fn(&LocalObserverServer) -> Result<(), HookError> + Send + Sync,
{
    fn on_server_init(&self, server: &LocalObserverServer) -> Result<(), HookError> {
        self(server)
    }
}

impl<F> OnMonitorEvent for F
where
    F: Fn(&Context, &MonitorEvent) -> Result<Control, HookError> + Send + Sync,
{
    fn on_monitor_event(&self, ctx: &Context, event: &MonitorEvent) -> Result<Control, HookError> {
        self(ctx, event)
    }
}

impl<F> OnDecodedFlow for F
where
    F: Fn(&Context, &Flow) -> Result<Control, HookError> + Send + Sync,
{
    fn on_decoded_flow(&self, ctx: &Context, flow: &Flow) -> Result<Control, HookError> {
        self(ctx, flow)
    }
}

impl<F> OnFlowDelivery for F
where
    F: Fn(&Context, &Flow) -> Result<Control, HookError> + Send + Sync,
{
    fn on_flow_delivery(&self, ctx: &Context, flow: &Flow) -> Result<Control, HookError> {
        self(ctx, flow)
    }
}

impl<F> OnGetFlows for F
where
    F: Fn(Context, &GetFlowsRequest) -> Result<Context, HookError> + Send + Sync,
{
    fn on_get_flows(&self, ctx: Context, request: &GetFlowsRequest) -> Result<Context, HookError> {
        self(ctx, request)
    }
}

/// Ordered hooks for every stage.
#[derive(Clone, Default)]
pub struct HookSet {
    server_init: Vec<Arc<dyn OnServerInit>>,
    monitor_event: Vec<Arc<dyn OnMonitorEvent>>,
    decoded_flow: Vec<Arc<dyn OnDecodedFlow>>,
    flow_delivery: Vec<Arc<dyn OnFlowDelivery>>,
    get_flows: Vec<Arc<dyn OnGetFlows>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server_init(&mut self, hook: Arc<dyn OnServerInit>) {
        self.server_init.push(hook);
    }

    pub fn add_monitor_event(&mut self, hook: Arc<dyn OnMonitorEvent>) {
        self.monitor_event.push(hook);
    }

    pub fn add_decoded_flow(&mut self, hook: Arc<dyn OnDecodedFlow>) {
        self.decoded_flow.push(hook);
    }

    pub fn add_flow_delivery(&mut self, hook: Arc<dyn OnFlowDelivery>) {
        self.flow_delivery.push(hook);
    }

    pub fn add_get_flows(&mut self, hook: Arc<dyn OnGetFlows>) {
        self.get_flows.push(hook);
    }

    /// Number of hooks registered for `stage`.
    pub fn count(&self, stage: HookStage) -> usize {
        match stage {
            HookStage::ServerInit => self.server_init.len(),
            HookStage::MonitorEvent => self.monitor_event.len(),
            HookStage::DecodedFlow => self.decoded_flow.len(),
            HookStage::FlowDelivery => self.flow_delivery.len(),
            HookStage::GetFlows => self.get_flows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.server_init.is_empty()
            && self.monitor_event.is_empty()
            && self.decoded_flow.is_empty()
            && self.flow_delivery.is_empty()
            && self.get_flows.is_empty()
    }

    pub(crate) fn run_server_init(
        &self,
        server: &LocalObserverServer,
    ) -> Result<(), ObserverError> {
        for hook in &self.server_init {
            hook.on_server_init(server)
                .map_err(|source| ObserverError::HookFailed {
                    stage: HookStage::ServerInit,
                    source,
                })?;
        }
        Ok(())
    }

    pub(crate) fn run_monitor_event(
        &self,
        ctx: &Context,
        event: &MonitorEvent,
    ) -> Result<Control, HookError> {
        run_stage(HookStage::MonitorEvent, &self.monitor_event, |hook| {
            hook.on_monitor_event(ctx, event)
        })
    }

    pub(crate) fn run_decoded_flow(
        &self,
        ctx: &Context,
        flow: &Flow,
    ) -> Result<Control, HookError> {
        run_stage(HookStage::DecodedFlow, &self.decoded_flow, |hook| {
            hook.on_decoded_flow(ctx, flow)
        })
    }

    pub(crate) fn run_flow_delivery(
        &self,
        ctx: &Context,
        flow: &Flow,
    ) -> Result<Control, HookError> {
        run_stage(HookStage::FlowDelivery, &self.flow_delivery, |hook| {
            hook.on_flow_delivery(ctx, flow)
        })
    }

    pub(crate) fn run_get_flows(
        &self,
        mut ctx: Context,
        request: &GetFlowsRequest,
    ) -> Result<Context, ObserverError> {
        for hook in &self.get_flows {
            ctx = hook
                .on_get_flows(ctx, request)
                .map_err(|source| ObserverError::HookFailed {
                    stage: HookStage::GetFlows,
                    source,
                })?;
        }
        Ok(ctx)
    }
}

fn run_stage<H: ?Sized>(
    stage: HookStage,
    hooks: &[Arc<H>],
    mut invoke: impl FnMut(&H) -> Result<Control, HookError>,
) -> Result<Control, HookError> {
    for (index, hook) in hooks.iter().enumerate() {
        let control = invoke(hook.as_ref())?;
        if !control.is_continue() {
            debug!("{stage} hook #{index} returned {control:?}");
            return Ok(control);
        }
    }
    Ok(Control::Continue)
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("on_server_init", &self.server_init.len())
            .field("on_monitor_event", &self.monitor_event.len())
            .field("on_decoded_flow", &self.decoded_flow.len())
            .field("on_flow_delivery", &self.flow_delivery.len())
            .field("on_get_flows", &self.get_flows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> MonitorEvent {
        MonitorEvent::perf(Utc::now(), "node", vec![1u8, 2, 3], 0)
    }

    mod stage_ordering_tests {
        use super::*;

        #[test]
        fn should_run_hooks_in_registration_order() {
            let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
            let mut hooks = HookSet::new();
            for id in 0..3 {
                let order = Arc::clone(&order);
                hooks.add_monitor_event(Arc::new(move |_: &Context, _: &MonitorEvent| {
                    order.lock().push(id);
                    Ok(Control::Continue)
                }));
            }

            let control = hooks.run_monitor_event(&Context::default(), &event()).unwrap();

            assert_eq!(control, Control::Continue);
            assert_eq!(*order.lock(), vec![0, 1, 2]);
        }

        #[test]
        fn should_not_invoke_later_hooks_after_stop() {
            let second_calls = Arc::new(AtomicUsize::new(0));
            let mut hooks = HookSet::new();
            hooks.add_decoded_flow(Arc::new(|_: &Context, _: &Flow| Ok(Control::Stop)));
            let calls = Arc::clone(&second_calls);
            hooks.add_decoded_flow(Arc::new(move |_: &Context, _: &Flow| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Control::Continue)
            }));

            let control = hooks
                .run_decoded_flow(&Context::default(), &Flow::default())
                .unwrap();

            assert_eq!(control, Control::Stop);
            assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn should_stop_stage_on_first_error() {
            let second_calls = Arc::new(AtomicUsize::new(0));
            let mut hooks = HookSet::new();
            hooks.add_flow_delivery(Arc::new(|_: &Context, _: &Flow| {
                Err(HookError::msg("rejected"))
            }));
            let calls = Arc::clone(&second_calls);
            hooks.add_flow_delivery(Arc::new(move |_: &Context, _: &Flow| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Control::Continue)
            }));

            let result = hooks.run_flow_delivery(&Context::default(), &Flow::default());

            assert!(result.is_err());
            assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn should_continue_with_no_hooks() {
            let hooks = HookSet::new();

            assert!(hooks.is_empty());
            assert_eq!(
                hooks.run_monitor_event(&Context::default(), &event()).unwrap(),
                Control::Continue
            );
        }
    }

    mod get_flows_tests {
        use super::*;

        #[derive(Debug, PartialEq)]
        struct Tenant(&'static str);

        #[test]
        fn should_thread_context_through_hooks() {
            let mut hooks = HookSet::new();
            hooks.add_get_flows(Arc::new(|ctx: Context, _: &GetFlowsRequest| {
                Ok(ctx.with_value(Tenant("blue")))
            }));

            let ctx = hooks
                .run_get_flows(Context::default(), &GetFlowsRequest::default())
                .unwrap();

            assert_eq!(ctx.value::<Tenant>(), Some(&Tenant("blue")));
        }

        #[test]
        fn should_report_failing_stage() {
            let mut hooks = HookSet::new();
            hooks.add_get_flows(Arc::new(|_: Context, _: &GetFlowsRequest| {
                Err(HookError::msg("denied"))
            }));

            let result = hooks.run_get_flows(Context::default(), &GetFlowsRequest::default());

            assert_matches!(
                result,
                Err(ObserverError::HookFailed {
                    stage: HookStage::GetFlows,
                    ..
                })
            );
        }
    }

    #[test]
    fn should_count_hooks_per_stage() {
        let mut hooks = HookSet::new();
        hooks.add_flow_delivery(Arc::new(|_: &Context, _: &Flow| Ok(Control::Skip)));
        hooks.add_flow_delivery(Arc::new(|_: &Context, _: &Flow| Ok(Control::Continue)));

        assert_eq!(hooks.count(HookStage::FlowDelivery), 2);
        assert_eq!(hooks.count(HookStage::GetFlows), 0);
        assert!(!hooks.is_empty());
    }
}
