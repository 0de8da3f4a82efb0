//! Component definitions.
//!
//! A [`Component`] is an immutable description: a name, the props it
//! declares, the events it emits and a `setup` function. Setup runs once per
//! instance and returns the render function, either directly or through a
//! future (async setup, which requires an enclosing suspense boundary).

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

use super::context::{RenderContext, SetupContext};
use crate::error::Result;
use crate::reactive::Value;
use crate::render::VNode;

/// Produces the component's vnode tree. Reads it performs are tracked by the
/// instance's render effect.
pub type RenderFn = Rc<dyn Fn(&RenderContext<'_>) -> Result<VNode>>;

pub type SetupFn = Rc<dyn Fn(&SetupContext) -> Result<SetupOutcome>>;

/// Pending result of an async setup.
pub type AsyncRender = LocalBoxFuture<'static, Result<RenderFn>>;

/// What `setup` hands back.
pub enum SetupOutcome {
    Render(RenderFn),
    Pending(AsyncRender),
}

impl SetupOutcome {
    pub fn render<F>(f: F) -> Self
    where
        F: Fn(&RenderContext<'_>) -> Result<VNode> + 'static,
    {
        SetupOutcome::Render(Rc::new(f))
    }

    pub fn pending<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<RenderFn>> + 'static,
    {
        SetupOutcome::Pending(fut.boxed_local())
    }
}

/// Box a closure as a [`RenderFn`].
pub fn render_fn<F>(f: F) -> RenderFn
where
    F: Fn(&RenderContext<'_>) -> Result<VNode> + 'static,
{
    Rc::new(f)
}

/// A declared prop.
#[derive(Debug, Clone)]
pub struct PropDef {
    pub name: Rc<str>,
    pub default: Option<Value>,
}

pub struct Component {
    name: Rc<str>,
    props: Vec<PropDef>,
    emits: Option<Vec<Rc<str>>>,
    inherit_attrs: bool,
    functional: bool,
    setup: Option<SetupFn>,
    render: Option<RenderFn>,
}

impl Component {
    pub fn new(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            props: Vec::new(),
            emits: None,
            inherit_attrs: true,
            functional: false,
            setup: None,
            render: None,
        }
    }

    /// A stateless component: just a render function over its props.
    pub fn functional<F>(name: &str, render: F) -> Self
    where
        F: Fn(&RenderContext<'_>) -> Result<VNode> + 'static,
    {
        let mut component = Self::new(name);
        component.functional = true;
        component.render = Some(Rc::new(render));
        component
    }

    pub fn prop(mut self, name: &str) -> Self {
        self.props.push(PropDef {
            name: Rc::from(name),
            default: None,
        });
        self
    }

    pub fn prop_with_default(mut self, name: &str, default: impl Into<Value>) -> Self {
        self.props.push(PropDef {
            name: Rc::from(name),
            default: Some(default.into()),
        });
        self
    }

    /// Declare emitted events. Listeners for them are not passed through
    /// as attrs.
    pub fn emits(mut self, events: &[&str]) -> Self {
        self.emits = Some(events.iter().map(|e| Rc::from(*e)).collect());
        self
    }

    pub fn inherit_attrs(mut self, inherit: bool) -> Self {
        self.inherit_attrs = inherit;
        self
    }

    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&SetupContext) -> Result<SetupOutcome> + 'static,
    {
        self.setup = Some(Rc::new(f));
        self
    }

    /// Render function used when there is no setup, or setup returns none.
    pub fn render<F>(mut self, f: F) -> Self
    where
        F: Fn(&RenderContext<'_>) -> Result<VNode> + 'static,
    {
        self.render = Some(Rc::new(f));
        self
    }

    pub fn build(self) -> Rc<Component> {
        Rc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    pub fn declared_props(&self) -> &[PropDef] {
        &self.props
    }

    pub fn declares_prop(&self, name: &str) -> bool {
        self.props.iter().any(|p| &*p.name == name)
    }

    pub fn declared_emits(&self) -> Option<&[Rc<str>]> {
        self.emits.as_deref()
    }

    pub fn inherits_attrs(&self) -> bool {
        self.inherit_attrs
    }

    pub(crate) fn setup_fn(&self) -> Option<&SetupFn> {
        self.setup.as_ref()
    }

    pub(crate) fn render_fn(&self) -> Option<&RenderFn> {
        self.render.as_ref()
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("props", &self.props)
            .field("functional", &self.functional)
            .finish()
    }
}
