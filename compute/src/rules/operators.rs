//! Built-in predicate operators.
//!
//! Every operator records its result through exactly one production mode:
//!
//! - `literal` aliases its constant and finishes during initialization;
//! - `field` and the filters (`eq`, `contains`, `starts_with`, `rx`,
//!   `ip_match`) build local lists, consuming new input items each phase and
//!   remembering how many they have seen in the node's state slot;
//! - `and`, `or` and `not` finish as soon as their result can no longer
//!   change.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use predicate_core::{
    EvalError, GraphEvalState, Node, NodeEvalState, NodeIndex, Operator, Phase, Transaction, Value,
};
use regex::Regex;

use super::types::{EqArgs, FieldArgs, IpMatchArgs, LiteralArgs, RegexArgs, StringArgs};

type OpResult = Result<(), EvalError>;

fn own<'a>(ges: &'a mut GraphEvalState, node: &Node) -> Result<&'a mut NodeEvalState, EvalError> {
    ges.node_eval_state_mut(node.index())
}

fn single_child(node: &Node) -> Result<NodeIndex, EvalError> {
    match node.children() {
        [child] => Ok(*child),
        children => Err(EvalError::Operator {
            node: node.index(),
            message: format!("expected exactly one child, found {}", children.len()),
        }),
    }
}

/// Finishes a node with an empty (false) local list.
fn finish_false(state: &mut NodeEvalState) -> OpResult {
    state.setup_local_list()?;
    state.finish()
}

/// Appends the items of `input` not yet seen by this node, keeping those
/// `keep` accepts.
fn consume_new_items(
    state: &mut NodeEvalState,
    input: &Value,
    mut keep: impl FnMut(&Value) -> bool,
) -> OpResult {
    state.setup_local_list()?;
    let items = input.items();
    let seen = *state.state_mut().get_or_insert_with(|| 0usize);
    for item in items.iter().skip(seen) {
        if keep(item) {
            state.append_to_list(item.clone())?;
        }
    }
    state.state_mut().set(items.len());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════════════════════════════════════

/// A compile-time constant.
#[derive(Debug)]
pub struct Literal {
    value: Value,
}

impl Literal {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

impl Operator for Literal {
    fn name(&self) -> &str {
        "literal"
    }

    fn eval_initialize(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> OpResult {
        let state = own(ges, node)?;
        state.alias(self.value.clone())?;
        state.finish()
    }

    fn eval_calculate(&self, _: &mut GraphEvalState, _: &Node, _: &dyn Transaction) -> OpResult {
        Ok(())
    }
}

/// Items of a transaction field, growing as the field grows.
#[derive(Debug)]
pub struct Field {
    name: String,
    final_phase: Phase,
}

impl Field {
    pub fn new(name: impl Into<String>, final_phase: Phase) -> Self {
        Self {
            name: name.into(),
            final_phase,
        }
    }
}

impl Operator for Field {
    fn name(&self) -> &str {
        "field"
    }

    fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, tx: &dyn Transaction) -> OpResult {
        let input = tx.field(&self.name).unwrap_or_default();
        let state = own(ges, node)?;
        consume_new_items(state, &input, |_| true)?;
        if tx.phase() >= self.final_phase {
            state.finish()?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Filters
// ═══════════════════════════════════════════════════════════════════════════

/// Test applied to each item of a filter's input.
pub trait ItemTest: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn test(&self, item: &Value) -> bool;
}

/// Lists the items of its single child that pass an [`ItemTest`]. Finishes
/// when the child does.
#[derive(Debug)]
pub struct Filter<T> {
    test: T,
}

impl<T: ItemTest> Filter<T> {
    pub fn new(test: T) -> Self {
        Self { test }
    }
}

impl<T: ItemTest> Operator for Filter<T> {
    fn name(&self) -> &str {
        self.test.name()
    }

    fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> OpResult {
        let child = single_child(node)?;
        let input = ges.value(child)?;
        let input_finished = ges.is_finished(child)?;

        let state = own(ges, node)?;
        consume_new_items(state, &input, |item| self.test.test(item))?;
        if input_finished {
            state.finish()?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Equals(pub Value);

impl ItemTest for Equals {
    fn name(&self) -> &str {
        "eq"
    }

    fn test(&self, item: &Value) -> bool {
        match (item.as_float(), self.0.as_float()) {
            (Some(a), Some(b)) => a == b,
            _ => *item == self.0,
        }
    }
}

#[derive(Debug)]
pub struct Contains {
    needle: String,
    case_insensitive: bool,
}

impl Contains {
    pub fn new(needle: &str, case_insensitive: bool) -> Self {
        let needle = if case_insensitive { needle.to_lowercase() } else { needle.to_string() };
        Self { needle, case_insensitive }
    }
}

impl ItemTest for Contains {
    fn name(&self) -> &str {
        "contains"
    }

    fn test(&self, item: &Value) -> bool {
        match item.as_str() {
            Some(s) if self.case_insensitive => s.to_lowercase().contains(&self.needle),
            Some(s) => s.contains(&self.needle),
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct StartsWith {
    prefix: String,
    case_insensitive: bool,
}

impl StartsWith {
    pub fn new(prefix: &str, case_insensitive: bool) -> Self {
        let prefix = if case_insensitive { prefix.to_lowercase() } else { prefix.to_string() };
        Self { prefix, case_insensitive }
    }
}

impl ItemTest for StartsWith {
    fn name(&self) -> &str {
        "starts_with"
    }

    fn test(&self, item: &Value) -> bool {
        match item.as_str() {
            Some(s) if self.case_insensitive => s.to_lowercase().starts_with(&self.prefix),
            Some(s) => s.starts_with(&self.prefix),
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct Rx(pub Regex);

impl ItemTest for Rx {
    fn name(&self) -> &str {
        "rx"
    }

    fn test(&self, item: &Value) -> bool {
        item.as_str().is_some_and(|s| self.0.is_match(s))
    }
}

#[derive(Debug)]
pub struct IpMatch(pub Vec<IpNet>);

impl ItemTest for IpMatch {
    fn name(&self) -> &str {
        "ip_match"
    }

    fn test(&self, item: &Value) -> bool {
        match item.as_str().map(|s| s.trim().parse::<IpAddr>()) {
            Some(Ok(ip)) => self.0.iter().any(|net| net.contains(&ip)),
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Logic
// ═══════════════════════════════════════════════════════════════════════════

/// True once every child is truthy; false once any child finishes falsy.
#[derive(Debug)]
pub struct And;

impl Operator for And {
    fn name(&self) -> &str {
        "and"
    }

    fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> OpResult {
        let mut all_truthy = true;
        for &child in node.children() {
            if ges.value(child)?.is_truthy() {
                continue;
            }
            if ges.is_finished(child)? {
                return finish_false(own(ges, node)?);
            }
            all_truthy = false;
        }
        if all_truthy {
            own(ges, node)?.finish_true()?;
        }
        Ok(())
    }
}

/// True once any child is truthy; false once every child finishes falsy.
#[derive(Debug)]
pub struct Or;

impl Operator for Or {
    fn name(&self) -> &str {
        "or"
    }

    fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> OpResult {
        let mut all_finished = true;
        for &child in node.children() {
            if ges.value(child)?.is_truthy() {
                return own(ges, node)?.finish_true();
            }
            all_finished &= ges.is_finished(child)?;
        }
        if all_finished {
            finish_false(own(ges, node)?)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Not;

impl Operator for Not {
    fn name(&self) -> &str {
        "not"
    }

    fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> OpResult {
        let child = single_child(node)?;
        if ges.value(child)?.is_truthy() {
            finish_false(own(ges, node)?)
        } else if ges.is_finished(child)? {
            own(ges, node)?.finish_true()
        } else {
            Ok(())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════

/// Number of children an operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    One,
    AtLeastOne,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::None => count == 0,
            Arity::One => count == 1,
            Arity::AtLeastOne => count >= 1,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::None => write!(f, "no children"),
            Arity::One => write!(f, "exactly one child"),
            Arity::AtLeastOne => write!(f, "at least one child"),
        }
    }
}

/// Builds an operator from its serialized arguments.
pub type OperatorFactory = fn(&serde_json::Value) -> Result<Arc<dyn Operator>, String>;

/// Maps operator names used in graph payloads to operator constructors.
#[derive(Clone)]
pub struct OperatorRegistry {
    entries: HashMap<String, (Arity, OperatorFactory)>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("OperatorRegistry").field("operators", &names).finish()
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &serde_json::Value) -> Result<T, String> {
    let args = if args.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(args).map_err(|e| e.to_string())
}

impl OperatorRegistry {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry with every built-in operator.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("literal", Arity::None, |args| {
            let args: LiteralArgs = parse_args(args)?;
            Ok(Arc::new(Literal::new(args.value)))
        });
        registry.register("field", Arity::None, |args| {
            let args: FieldArgs = parse_args(args)?;
            Ok(Arc::new(Field::new(args.name, args.final_phase)))
        });
        registry.register("eq", Arity::One, |args| {
            let args: EqArgs = parse_args(args)?;
            Ok(Arc::new(Filter::new(Equals(args.value))))
        });
        registry.register("contains", Arity::One, |args| {
            let args: StringArgs = parse_args(args)?;
            Ok(Arc::new(Filter::new(Contains::new(&args.value, args.case_insensitive))))
        });
        registry.register("starts_with", Arity::One, |args| {
            let args: StringArgs = parse_args(args)?;
            Ok(Arc::new(Filter::new(StartsWith::new(&args.value, args.case_insensitive))))
        });
        registry.register("rx", Arity::One, |args| {
            let args: RegexArgs = parse_args(args)?;
            let regex = Regex::new(&args.pattern).map_err(|e| e.to_string())?;
            Ok(Arc::new(Filter::new(Rx(regex))))
        });
        registry.register("ip_match", Arity::One, |args| {
            let args: IpMatchArgs = parse_args(args)?;
            let networks = args
                .networks
                .iter()
                .map(|s| parse_network(s))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Arc::new(Filter::new(IpMatch(networks))))
        });
        registry.register("and", Arity::AtLeastOne, |_| Ok(Arc::new(And)));
        registry.register("or", Arity::AtLeastOne, |_| Ok(Arc::new(Or)));
        registry.register("not", Arity::One, |_| Ok(Arc::new(Not)));
        registry
    }

    pub fn register(&mut self, name: &str, arity: Arity, factory: OperatorFactory) {
        self.entries.insert(name.to_string(), (arity, factory));
    }

    pub fn arity(&self, name: &str) -> Option<Arity> {
        self.entries.get(name).map(|(arity, _)| *arity)
    }

    /// Builds the operator `name`. `None` if the name is unknown.
    pub fn build(
        &self,
        name: &str,
        args: &serde_json::Value,
    ) -> Option<Result<Arc<dyn Operator>, String>> {
        self.entries.get(name).map(|(_, factory)| factory(args))
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Parses a CIDR network, accepting bare addresses as host networks.
fn parse_network(s: &str) -> Result<IpNet, String> {
    let s = s.trim();
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net);
    }
    let ip = s
        .parse::<IpAddr>()
        .map_err(|_| format!("invalid network '{}'", s))?;
    let host_prefix = if ip.is_ipv4() { 32 } else { 128 };
    IpNet::new(ip, host_prefix).map_err(|e| e.to_string())
}
