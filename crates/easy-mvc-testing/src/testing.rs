use std::rc::Rc;
use std::time::Duration;

use easy_mvc_core::{
    Clock, Component, DefaultScheduler, ManualClock, MvcConfig, MvcError, PositionId, Runtime,
    RuntimeHandle, Tree,
};

/// Headless harness for exercising views and controllers in tests.
///
/// `MvcTestRule` owns a [`Runtime`] on a [`ManualClock`] and a [`Tree`]. Time
/// only moves through [`advance_time`](Self::advance_time), so delayed
/// destruction and other timed work run exactly when a test says so.
pub struct MvcTestRule {
    clock: Rc<ManualClock>,
    runtime: Runtime,
    tree: Tree,
}

impl MvcTestRule {
    pub fn new() -> Self {
        Self::with_config(MvcConfig::default())
    }

    pub fn with_config(config: MvcConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let clock = Rc::new(ManualClock::new());
        let runtime = Runtime::with_platform(Rc::new(DefaultScheduler), clock.clone())
            .with_config(config);
        let tree = Tree::new(runtime.handle());
        Self {
            clock,
            runtime,
            tree,
        }
    }

    /// Install `component` at the root and perform the initial render.
    pub fn mount<C: Component>(
        &mut self,
        component: C,
        props: C::Props,
    ) -> Result<PositionId, MvcError> {
        self.tree.mount(component, props)
    }

    /// Render `component` at the root as a parent re-render would.
    pub fn set_content<C: Component>(
        &mut self,
        component: &Rc<C>,
        props: C::Props,
    ) -> Result<PositionId, MvcError> {
        self.tree.set_content(component, props)
    }

    /// Drive microtasks, futures, due tasks and requested renders until none
    /// of them makes progress. Returns the number of positions re-rendered.
    pub fn pump_until_idle(&mut self) -> Result<usize, MvcError> {
        let mut rendered = 0;
        loop {
            let progressed = self.runtime.run_until_idle();
            let count = self.tree.render_dirty()?;
            rendered += count;
            if !progressed && count == 0 {
                break;
            }
        }
        Ok(rendered)
    }

    /// Move the clock forward by `by` and process whatever became due.
    pub fn advance_time(&mut self, by: Duration) -> Result<usize, MvcError> {
        self.clock.advance(by);
        self.pump_until_idle()
    }

    /// Simulate a development-mode remount of the whole tree.
    pub fn remount(&mut self) -> Result<usize, MvcError> {
        self.tree.remount();
        self.pump_until_idle()
    }

    pub fn unmount(&mut self) -> Result<(), MvcError> {
        self.tree.unmount();
        self.pump_until_idle().map(|_| ())
    }

    /// Text output of the tree, depth first.
    pub fn text(&self) -> String {
        self.tree.text()
    }

    pub fn render_count(&self) -> u64 {
        self.tree.render_count()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn tree(&mut self) -> &mut Tree {
        &mut self.tree
    }
}

impl Default for MvcTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to an
/// `MvcTestRule`.
pub fn run_test_tree<R>(f: impl FnOnce(&mut MvcTestRule) -> R) -> R {
    let mut rule = MvcTestRule::new();
    f(&mut rule)
}
