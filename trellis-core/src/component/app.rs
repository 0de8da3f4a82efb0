//! Application entry point and app-level configuration.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use super::definition::Component;
use super::instance::{ComponentInstance, InstanceId};
use crate::error::{Error, ErrorSource, Result};
use crate::reactive::Value;
use crate::render::{create_vnode, HostNode, HostOps, PatchFlags, Props, Renderer, VNode};

/// Receives errors no `error_captured` hook handled.
pub type AppErrorHandler = Rc<dyn Fn(&Error, Option<InstanceId>, ErrorSource)>;

/// Receives warnings with the component trace, innermost first.
pub type AppWarnHandler = Rc<dyn Fn(&str, &[String])>;

/// Per-app configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub error_handler: Option<AppErrorHandler>,
    pub warn_handler: Option<AppWarnHandler>,
    /// Emit `tracing` spans around component renders and patches.
    pub performance: bool,
    /// Record readable from every component's setup and render context.
    pub global_properties: Value,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            error_handler: None,
            warn_handler: None,
            performance: false,
            global_properties: Value::record(Vec::<(Rc<str>, Value)>::new()),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error, Option<InstanceId>, ErrorSource) + 'static,
    {
        self.error_handler = Some(Rc::new(f));
        self
    }

    pub fn warn_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &[String]) + 'static,
    {
        self.warn_handler = Some(Rc::new(f));
        self
    }

    pub fn performance(mut self, enabled: bool) -> Self {
        self.performance = enabled;
        self
    }

    pub fn global_properties(mut self, properties: Value) -> Self {
        self.global_properties = properties;
        self
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .field("performance", &self.performance)
            .field("global_properties", &self.global_properties)
            .finish()
    }
}

/// State shared by every instance of one app.
#[derive(Debug, Default)]
pub struct AppContext {
    config: AppConfig,
    provides: RefCell<Rc<IndexMap<Rc<str>, Value>>>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            provides: RefCell::new(Rc::new(IndexMap::new())),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub(crate) fn provides(&self) -> Rc<IndexMap<Rc<str>, Value>> {
        Rc::clone(&self.provides.borrow())
    }

    pub(crate) fn provide(&self, key: &str, value: Value) {
        Rc::make_mut(&mut *self.provides.borrow_mut()).insert(Rc::from(key), value);
    }
}

/// An application: a root component plus app-level configuration.
pub struct App {
    root: Rc<Component>,
    root_props: Option<Props>,
    config: AppConfig,
    provides: Vec<(Rc<str>, Value)>,
}

impl App {
    pub fn new(root: Rc<Component>) -> Self {
        Self {
            root,
            root_props: None,
            config: AppConfig::default(),
            provides: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_props(mut self, props: Props) -> Self {
        self.root_props = Some(props);
        self
    }

    /// Make `value` injectable by every component of the app.
    pub fn provide(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.provides.push((Rc::from(key), value.into()));
        self
    }

    /// Render the root component into `container`.
    ///
    /// Errors raised during the initial mount that no handler took care of
    /// are returned; the partially mounted app is dropped.
    pub fn mount<H: HostOps + 'static>(self, host: H, container: HostNode) -> Result<MountedApp<H>> {
        let context = Rc::new(AppContext::new(self.config));
        for (key, value) in self.provides {
            context.provide(&key, value);
        }
        let renderer = Renderer::with_context(host, Rc::clone(&context));
        let vnode = create_vnode(&self.root, self.root_props, (), PatchFlags::empty(), &[]);
        debug!(component = self.root.name(), container = container.0, "mounting app");
        renderer.render(Some(vnode.clone()), container)?;
        Ok(MountedApp {
            renderer,
            container,
            vnode,
            context,
        })
    }
}

/// A mounted application.
pub struct MountedApp<H: HostOps + 'static> {
    renderer: Renderer<H>,
    container: HostNode,
    vnode: VNode,
    context: Rc<AppContext>,
}

impl<H: HostOps + 'static> MountedApp<H> {
    pub fn renderer(&self) -> &Renderer<H> {
        &self.renderer
    }

    pub fn host(&self) -> &H {
        self.renderer.host()
    }

    pub fn container(&self) -> HostNode {
        self.container
    }

    pub fn context(&self) -> &Rc<AppContext> {
        &self.context
    }

    pub fn root_instance(&self) -> Option<Rc<ComponentInstance>> {
        self.vnode.component().and_then(|id| self.renderer.instance(id))
    }

    /// Unmount the root, running every unmount hook.
    pub fn unmount(self) -> Result<()> {
        debug!(container = self.container.0, "unmounting app");
        self.renderer.render(None, self.container)
    }
}
