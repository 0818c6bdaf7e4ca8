//! Chained method capture.
//!
//! A [`CallProxy`] stands in for a remote object that has no local methods.
//! Walking names with [`CallProxy::child`] builds a path without doing any
//! work; invoking a node hands the collected path and the arguments to a
//! single [`Dispatch`] implementation.
//!
//! ```ignore
//! let proxy = CallProxy::root("root", |chain: Vec<String>, args| (chain, args));
//! let (chain, args) = proxy.child("users").child("get").call(vec![json!(1)]);
//! assert_eq!(chain, ["root", "users", "get"]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

/// Names ending in this suffix are invoked under the bare name, so
/// `config.timeout_get()` calls the remote `config.timeout`.
pub const GETTER_SUFFIX: &str = "_get";

/// Receiver of every captured invocation.
pub trait Dispatch: Send + Sync {
    type Output;

    /// `chain` runs from the root name to the invoked name.
    fn dispatch(&self, chain: Vec<String>, args: Option<Vec<Value>>) -> Self::Output;
}

impl<F, O> Dispatch for F
where
    F: Fn(Vec<String>, Option<Vec<Value>>) -> O + Send + Sync,
{
    type Output = O;

    fn dispatch(&self, chain: Vec<String>, args: Option<Vec<Value>>) -> O {
        self(chain, args)
    }
}

struct Node {
    name: String,
    parent: Option<Arc<Node>>,
    children: Mutex<HashMap<String, Weak<Node>>>,
}

impl Node {
    fn new(name: String, parent: Option<Arc<Node>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            parent,
            children: Mutex::new(HashMap::new()),
        })
    }

    fn child(self: &Arc<Self>, name: &str) -> Arc<Node> {
        // Nodes hold no invariant a panic could break, so a poisoned map is
        // still usable.
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = children.get(name).and_then(Weak::upgrade) {
            return existing;
        }
        // Children point at their parent, so the cache holds them weakly.
        let node = Node::new(name.to_string(), Some(Arc::clone(self)));
        children.insert(name.to_string(), Arc::downgrade(&node));
        node
    }

    fn chain(&self) -> Vec<String> {
        let mut chain = vec![strip_getter(&self.name).to_string()];
        let mut iter = self.parent.as_deref();
        while let Some(node) = iter {
            chain.push(node.name.clone());
            iter = node.parent.as_deref();
        }
        chain.reverse();
        chain
    }
}

fn strip_getter(name: &str) -> &str {
    name.strip_suffix(GETTER_SUFFIX).unwrap_or(name)
}

/// Result of a top-level property lookup.
pub enum Property<D: Dispatch> {
    /// A literal override value; no call is captured.
    Value(Value),
    /// A capture node for further chaining or invocation.
    Node(CallProxy<D>),
}

impl<D: Dispatch> Property<D> {
    pub fn into_node(self) -> Option<CallProxy<D>> {
        match self {
            Property::Node(node) => Some(node),
            Property::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Property::Value(value) => Some(value),
            Property::Node(_) => None,
        }
    }
}

/// One node of a capture tree.
///
/// Cloning is cheap: clones share the node, its cached children, and the
/// dispatcher.
pub struct CallProxy<D: Dispatch> {
    node: Arc<Node>,
    dispatcher: Arc<D>,
    overrides: Arc<HashMap<String, Value>>,
}

impl<D: Dispatch> Clone for CallProxy<D> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            dispatcher: Arc::clone(&self.dispatcher),
            overrides: Arc::clone(&self.overrides),
        }
    }
}

impl<D: Dispatch> fmt::Debug for CallProxy<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallProxy")
            .field("chain", &self.node.chain())
            .finish()
    }
}

impl<D: Dispatch> CallProxy<D> {
    /// Create a root node named `name`.
    pub fn root(name: impl Into<String>, dispatcher: D) -> Self {
        Self::with_dispatcher(name, Arc::new(dispatcher))
    }

    /// Create a root node sharing an existing dispatcher.
    pub fn with_dispatcher(name: impl Into<String>, dispatcher: Arc<D>) -> Self {
        Self {
            node: Node::new(name.into(), None),
            dispatcher,
            overrides: Arc::new(HashMap::new()),
        }
    }

    /// Replace the literal override table consulted by [`CallProxy::get`]
    /// on the root.
    pub fn with_overrides(mut self, overrides: HashMap<String, Value>) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    /// This node's own name.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }

    /// Property access. On the root, names in the override table return
    /// their literal value; everything else returns a capture node.
    pub fn get(&self, name: &str) -> Property<D> {
        if self.is_root() {
            if let Some(value) = self.overrides.get(name) {
                return Property::Value(value.clone());
            }
        }
        Property::Node(self.child(name))
    }

    /// Capture node for `name` under this node. Repeated access returns
    /// the same node.
    pub fn child(&self, name: &str) -> CallProxy<D> {
        CallProxy {
            node: self.node.child(name),
            dispatcher: Arc::clone(&self.dispatcher),
            overrides: Arc::clone(&self.overrides),
        }
    }

    /// Walk a dot-separated path of children.
    pub fn path(&self, dotted: &str) -> CallProxy<D> {
        dotted
            .split('.')
            .filter(|segment| !segment.is_empty())
            .fold(self.clone(), |node, segment| node.child(segment))
    }

    /// Names from the root to this node, as they would be dispatched.
    pub fn chain(&self) -> Vec<String> {
        self.node.chain()
    }

    /// Whether two handles refer to the same capture node.
    pub fn same_node(&self, other: &CallProxy<D>) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Invoke this node with positional arguments.
    pub fn call(&self, args: Vec<Value>) -> D::Output {
        self.invoke(Some(args))
    }

    /// Invoke this node; `None` sends no argument list at all.
    pub fn invoke(&self, args: Option<Vec<Value>>) -> D::Output {
        self.dispatcher.dispatch(self.node.chain(), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    type Captured = (Vec<String>, Option<Vec<Value>>);

    fn echo_proxy() -> CallProxy<impl Dispatch<Output = Captured>> {
        CallProxy::root("root", |chain: Vec<String>, args: Option<Vec<Value>>| (chain, args))
    }

    #[test]
    fn test_chain_collects_root_to_leaf() {
        let proxy = echo_proxy();
        let (chain, args) = proxy
            .child("users")
            .child("get")
            .call(vec![json!({"id": 1}), json!("x")]);

        assert_eq!(chain, vec!["root", "users", "get"]);
        assert_eq!(args, Some(vec![json!({"id": 1}), json!("x")]));
    }

    #[test]
    fn test_single_name_chain() {
        let (chain, args) = echo_proxy().child("ping").invoke(None);
        assert_eq!(chain, vec!["root", "ping"]);
        assert_eq!(args, None);
    }

    #[test]
    fn test_repeated_access_returns_cached_node() {
        let proxy = echo_proxy();
        let first = proxy.child("a").child("b");
        let second = proxy.child("a").child("b");
        assert!(first.same_node(&second));
        assert!(!first.same_node(&proxy.child("a")));
    }

    #[test]
    fn test_traversal_does_not_dispatch() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let proxy = CallProxy::root("root", move |_chain: Vec<String>, _args: Option<Vec<Value>>| {
            *counter.lock().unwrap() += 1;
        });

        let node = proxy.path("deep.nested.method");
        let _ = proxy.child("deep").child("nested");
        assert_eq!(*calls.lock().unwrap(), 0);

        node.call(vec![]);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_getter_suffix_dropped_on_invoked_name() {
        let (chain, _) = echo_proxy().path("config.timeout_get").call(vec![]);
        assert_eq!(chain, vec!["root", "config", "timeout"]);

        // Only the invoked name is rewritten.
        let (chain, _) = echo_proxy().path("cache_get.size").call(vec![]);
        assert_eq!(chain, vec!["root", "cache_get", "size"]);
    }

    #[test]
    fn test_overrides_bypass_capture() {
        let mut overrides = HashMap::new();
        overrides.insert("version".to_string(), json!("1.2.3"));
        let proxy = echo_proxy().with_overrides(overrides);

        assert_eq!(proxy.get("version").into_value(), Some(json!("1.2.3")));

        let node = proxy.get("users").into_node().expect("users is not overridden");
        assert_eq!(node.chain(), vec!["root", "users"]);

        // Overrides only apply at the top level.
        let nested = node.get("version").into_node().expect("nested lookup captures");
        assert_eq!(nested.chain(), vec!["root", "users", "version"]);
    }

    #[test]
    fn test_path_matches_child_chain() {
        let proxy = echo_proxy();
        assert!(proxy.path("a.b.c").same_node(&proxy.child("a").child("b").child("c")));
        assert_eq!(proxy.path("a.b.c").name(), "c");
    }
}
