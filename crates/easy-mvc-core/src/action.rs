//! Named actions and their resolution up the controller chain.

use std::any::{type_name, Any};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::controller::{AnyNode, Controller, Node, NodeRef};
use crate::error::MvcError;
use crate::tree::short_type_name;

type ErasedResult = Result<Box<dyn Any>, MvcError>;
type Handler<C> = Rc<dyn Fn(&NodeRef<C>, Box<dyn Any>) -> ErasedResult>;

struct Entry<C: Controller> {
    args: &'static str,
    returns: &'static str,
    handler: Handler<C>,
}

/// The actions one controller type defines, by name.
pub struct ActionTable<C: Controller> {
    entries: HashMap<&'static str, Entry<C>, RandomState>,
}

impl<C: Controller> ActionTable<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Registers `handler` under `name`. Registering a name twice keeps the
    /// later handler.
    pub fn action<A, R>(
        &mut self,
        name: &'static str,
        handler: impl Fn(&NodeRef<C>, A) -> R + 'static,
    ) -> &mut Self
    where
        A: 'static,
        R: 'static,
    {
        let erased: Handler<C> = Rc::new(move |node: &NodeRef<C>, args: Box<dyn Any>| {
            let args = args.downcast::<A>().map_err(|_| MvcError::ActionSignature {
                action: name.to_string(),
                detail: format!("arguments that are not `{}`", type_name::<A>()),
            })?;
            Ok(Box::new(handler(node, *args)) as Box<dyn Any>)
        });
        let previous = self.entries.insert(
            name,
            Entry {
                args: type_name::<A>(),
                returns: type_name::<R>(),
                handler: erased,
            },
        );
        if previous.is_some() {
            log::warn!(
                "action `{name}` registered twice on {}",
                short_type_name::<C>()
            );
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn bind(&self, name: &str, owner: &NodeRef<C>) -> Option<Action> {
        let (&name, entry) = self.entries.get_key_value(name)?;
        let handler = Rc::clone(&entry.handler);
        let owner = Rc::clone(owner);
        Some(Action {
            name,
            owner_type: short_type_name::<C>(),
            args: entry.args,
            returns: entry.returns,
            call: Rc::new(move |args| handler(&owner, args)),
        })
    }
}

impl<C: Controller> Default for ActionTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// An action bound to the node that defines it.
#[derive(Clone)]
pub struct Action {
    name: &'static str,
    owner_type: &'static str,
    args: &'static str,
    returns: &'static str,
    call: Rc<dyn Fn(Box<dyn Any>) -> ErasedResult>,
}

impl Action {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn owner_type(&self) -> &'static str {
        self.owner_type
    }

    fn check_args<A: 'static>(&self) -> Result<(), MvcError> {
        if type_name::<A>() == self.args {
            return Ok(());
        }
        Err(MvcError::ActionSignature {
            action: self.name.to_string(),
            detail: format!(
                "arguments of type `{}`, expected `{}`",
                type_name::<A>(),
                self.args
            ),
        })
    }

    pub fn call<A: 'static, R: 'static>(&self, args: A) -> Result<R, MvcError> {
        self.check_args::<A>()?;
        let result = (self.call)(Box::new(args))?;
        result
            .downcast::<R>()
            .map(|value| *value)
            .map_err(|_| MvcError::ActionSignature {
                action: self.name.to_string(),
                detail: format!(
                    "return type `{}`, but it returns `{}`",
                    type_name::<R>(),
                    self.returns
                ),
            })
    }

    /// Calls the action and drops whatever it returns.
    pub fn invoke<A: 'static>(&self, args: A) -> Result<(), MvcError> {
        self.check_args::<A>()?;
        (self.call)(Box::new(args)).map(drop)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("owner", &self.owner_type)
            .field("args", &self.args)
            .field("returns", &self.returns)
            .finish()
    }
}

pub enum Resolution {
    Found {
        owner: Rc<dyn AnyNode>,
        action: Action,
    },
    NotFound,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Found { owner, action } => f
                .debug_struct("Found")
                .field("owner", &owner.name())
                .field("action", action)
                .finish(),
            Resolution::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Dispatches actions on behalf of a node, delegating to the nearest
/// ancestor that defines them. Everything else derefs to the node.
pub struct ActionProxy<C: Controller> {
    node: NodeRef<C>,
}

impl<C: Controller> Clone for ActionProxy<C> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<C: Controller> ActionProxy<C> {
    pub fn new(node: NodeRef<C>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &NodeRef<C> {
        &self.node
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        let mut cursor: Option<Rc<dyn AnyNode>> = Some(Rc::clone(&self.node) as Rc<dyn AnyNode>);
        while let Some(node) = cursor {
            if let Some(action) = node.bind_action(name) {
                log::trace!("{name} on {} resolved to {}", self.node.name(), node.name());
                return Resolution::Found {
                    owner: node,
                    action,
                };
            }
            cursor = node.parent();
        }
        Resolution::NotFound
    }

    pub fn dispatch<A: 'static, R: 'static>(&self, name: &str, args: A) -> Result<R, MvcError> {
        match self.resolve(name) {
            Resolution::Found { action, .. } => action.call(args),
            Resolution::NotFound => Err(self.missing(name)),
        }
    }

    /// Dispatches an argument-less action, discarding its result.
    pub fn invoke(&self, name: &str) -> Result<(), MvcError> {
        match self.resolve(name) {
            Resolution::Found { action, .. } => action.invoke(()),
            Resolution::NotFound => Err(self.missing(name)),
        }
    }

    pub fn responds_to(&self, name: &str) -> bool {
        matches!(self.resolve(name), Resolution::Found { .. })
    }

    fn missing(&self, name: &str) -> MvcError {
        MvcError::NoSuchAction {
            action: name.to_string(),
            node_type: short_type_name::<C>(),
        }
    }
}

impl<C: Controller> Deref for ActionProxy<C> {
    type Target = Node<C>;

    fn deref(&self) -> &Node<C> {
        &self.node
    }
}

impl<C: Controller> fmt::Debug for ActionProxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActionProxy").field(&self.node.name()).finish()
    }
}

#[cfg(test)]
#[path = "tests/action_tests.rs"]
mod tests;
