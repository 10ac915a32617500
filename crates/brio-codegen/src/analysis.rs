//! Per-function dataflow analysis of variable definiteness.
//!
//! The analysis decides one thing for the emitter: whether a variable can be
//! read before it is definitely assigned, in which case the generated routine
//! must carry a defensive default initializer for it. It is a single forward
//! pass over the statement tree, threading a [`FlowScope`] through sequential
//! statements and forking and merging at branches and loops.
//!
//! The analysis is deliberately conservative. It never fails on program
//! structure; the worst case is widening a variable to [`VarState::Unknown`],
//! which costs one redundant initializer in the generated source, never
//! incorrect output.

use brio_core::program::{Expr, ExprKind, FunctionDecl, NodeId, Program, Stmt};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Where a definitely-assigned variable got its value.
///
/// Two `Known` states only agree at a merge point when their derivations are
/// identical. Derivations compare by expression node identity, so two
/// branches assigning textually identical literals still widen to Unknown;
/// that loses a little precision but stays deterministic and sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Assigned from the expression with this node identity.
    Expr(NodeId),
    /// Bound as the function parameter at this index.
    Param(usize),
    /// Bound by a catch clause.
    Caught,
}

/// Definiteness of one variable at one program point.
///
/// `Unknown` is the top of the lattice: state only ever widens toward it
/// within a derivation chain, never narrows back without a fresh scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarState {
    Known(Derivation),
    Unknown,
}

impl VarState {
    pub fn is_known(&self) -> bool {
        matches!(self, VarState::Known(_))
    }
}

/// Handle of a loop aggregator in the [`FlowAnalysis`] arena.
///
/// Scopes refer to their enclosing loop only through this handle, keeping
/// the child-to-parent link one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopId(usize);

/// Accumulates the variable-state snapshots observed at every `continue` and
/// `break` beneath one loop, for merging into the scope after the loop.
#[derive(Debug, Clone, Default)]
pub struct LoopAggregator {
    parent: Option<LoopId>,
    pub continue_states: Vec<HashMap<String, VarState>>,
    pub break_states: Vec<HashMap<String, VarState>>,
}

/// One variable-state snapshot: the map of tracked variables at a program
/// point, plus the handle of the nearest enclosing loop, if any.
#[derive(Debug, Clone, Default)]
pub struct FlowScope {
    vars: HashMap<String, VarState>,
    loop_link: Option<LoopId>,
}

impl FlowScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent snapshot for analyzing a divergent branch.
    pub fn fork(&self) -> FlowScope {
        self.clone()
    }

    pub fn get(&self, name: &str) -> Option<VarState> {
        self.vars.get(name).copied()
    }

    pub fn bind(&mut self, name: &str, state: VarState) {
        self.vars.insert(name.to_string(), state);
    }

    /// Widen every tracked variable to Unknown. Used when entering an
    /// unanalyzable construct: catch handlers and dynamic inclusion.
    pub fn set_unknown(&mut self) {
        for state in self.vars.values_mut() {
            *state = VarState::Unknown;
        }
    }

    /// The dataflow meet at a control-flow join. A variable is Known in the
    /// result only when both sides agree on the same derivation; any
    /// disagreement, or absence from one side, widens to Unknown.
    pub fn merge(&self, other: &FlowScope) -> FlowScope {
        let mut merged = FlowScope {
            vars: HashMap::new(),
            loop_link: self.loop_link,
        };
        for name in self.vars.keys().chain(other.vars.keys()) {
            if merged.vars.contains_key(name) {
                continue;
            }
            let state = match (self.vars.get(name), other.vars.get(name)) {
                (Some(a), Some(b)) if a == b => *a,
                _ => VarState::Unknown,
            };
            merged.vars.insert(name.clone(), state);
        }
        merged
    }

    fn merge_map(&self, vars: &HashMap<String, VarState>) -> FlowScope {
        self.merge(&FlowScope {
            vars: vars.clone(),
            loop_link: self.loop_link,
        })
    }

    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(|s| s.as_str())
    }
}

/// Arena of loop aggregators for one function's analysis.
#[derive(Debug, Default)]
pub struct FlowAnalysis {
    loops: Vec<LoopAggregator>,
}

impl FlowAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a loop: allocate an aggregator and derive the body scope that
    /// records into it.
    pub fn enter_loop(&mut self, scope: &FlowScope) -> (LoopId, FlowScope) {
        self.reenter_loop(scope, Vec::new(), Vec::new())
    }

    /// Begin the second pass over a loop body, with the aggregator
    /// pre-seeded from the first pass so exit effects discovered then still
    /// count.
    pub fn reenter_loop(
        &mut self,
        scope: &FlowScope,
        continue_states: Vec<HashMap<String, VarState>>,
        break_states: Vec<HashMap<String, VarState>>,
    ) -> (LoopId, FlowScope) {
        let id = LoopId(self.loops.len());
        self.loops.push(LoopAggregator {
            parent: scope.loop_link,
            continue_states,
            break_states,
        });
        let mut body_scope = scope.fork();
        body_scope.loop_link = Some(id);
        (id, body_scope)
    }

    /// Push the current snapshot into the nearest enclosing loop's continue
    /// set. Outside any loop this is a silent no-op; the original engine
    /// behaves that way and we preserve it rather than invent a rejection.
    pub fn record_continue(&mut self, scope: &FlowScope) {
        match scope.loop_link {
            Some(LoopId(idx)) => self.loops[idx].continue_states.push(scope.vars.clone()),
            None => warn!("continue outside any enclosing loop; ignored"),
        }
    }

    /// Push the current snapshot into the nearest enclosing loop's break set.
    /// Same no-op rule outside a loop as [`record_continue`].
    ///
    /// [`record_continue`]: FlowAnalysis::record_continue
    pub fn record_break(&mut self, scope: &FlowScope) {
        match scope.loop_link {
            Some(LoopId(idx)) => self.loops[idx].break_states.push(scope.vars.clone()),
            None => warn!("break outside any enclosing loop; ignored"),
        }
    }

    /// Drain the accumulated exit snapshots of a finished loop.
    pub fn take_loop(&mut self, id: LoopId) -> LoopAggregator {
        std::mem::take(&mut self.loops[id.0])
    }

    pub fn parent_of(&self, id: LoopId) -> Option<LoopId> {
        self.loops[id.0].parent
    }
}

/// What the emitter needs to know about one variable of one routine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarSummary {
    /// A read can reach this variable while it is not definitely assigned;
    /// the generated routine must start it at the default value.
    pub needs_default_init: bool,
    /// Set for formal parameters.
    pub param_index: Option<usize>,
}

/// Analysis result for one routine (the program entry or one function).
#[derive(Debug, Clone, Default)]
pub struct FunctionAnalysis {
    vars: BTreeMap<String, VarSummary>,
}

impl FunctionAnalysis {
    pub fn var(&self, name: &str) -> Option<&VarSummary> {
        self.vars.get(name)
    }

    /// Variables in deterministic (name) order.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &VarSummary)> {
        self.vars.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Analyze one declared function.
pub fn analyze_function(func: &FunctionDecl) -> FunctionAnalysis {
    let mut walker = Walker::new();
    let mut scope = FlowScope::new();
    for (i, param) in func.params.iter().enumerate() {
        scope.bind(&param.name, VarState::Known(Derivation::Param(i)));
        walker
            .summary
            .entry(param.name.clone())
            .or_default()
            .param_index = Some(i);
    }
    walker.stmts(&func.body, scope);
    FunctionAnalysis {
        vars: walker.summary,
    }
}

/// Analyze a program's top-level statement.
pub fn analyze_top(program: &Program) -> FunctionAnalysis {
    let mut walker = Walker::new();
    walker.stmt(&program.top, FlowScope::new());
    FunctionAnalysis {
        vars: walker.summary,
    }
}

struct Walker {
    flow: FlowAnalysis,
    summary: BTreeMap<String, VarSummary>,
}

impl Walker {
    fn new() -> Self {
        Self {
            flow: FlowAnalysis::new(),
            summary: BTreeMap::new(),
        }
    }

    /// Analyze a statement sequence. Returns the fall-through scope, or None
    /// when control cannot reach the end of the sequence.
    fn stmts(&mut self, stmts: &[Stmt], scope: FlowScope) -> Option<FlowScope> {
        let mut current = Some(scope);
        for stmt in stmts {
            match current {
                Some(scope) => current = self.stmt(stmt, scope),
                // Unreachable statements are skipped, not analyzed; they
                // cannot contribute definiteness.
                None => break,
            }
        }
        current
    }

    fn stmt(&mut self, stmt: &Stmt, mut scope: FlowScope) -> Option<FlowScope> {
        match stmt {
            Stmt::Block { body, .. } => self.stmts(body, scope),
            Stmt::Expr { expr, .. } => {
                self.expr(expr, &mut scope);
                Some(scope)
            }
            Stmt::Assign { target, value, .. } => {
                self.expr(value, &mut scope);
                self.touch(target);
                scope.bind(target, VarState::Known(Derivation::Expr(value.id)));
                Some(scope)
            }
            Stmt::Echo { expr, .. } => {
                self.expr(expr, &mut scope);
                Some(scope)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                self.expr(cond, &mut scope);
                let then_exit = self.stmts(then_body, scope.fork());
                let else_exit = self.stmts(else_body, scope);
                match (then_exit, else_exit) {
                    (Some(a), Some(b)) => Some(a.merge(&b)),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                }
            }
            Stmt::While { cond, body, .. } => Some(self.while_loop(cond, body, scope)),
            Stmt::Break { .. } => {
                self.flow.record_break(&scope);
                None
            }
            Stmt::Continue { .. } => {
                self.flow.record_continue(&scope);
                None
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.expr(value, &mut scope);
                }
                None
            }
            Stmt::Try {
                body,
                catch_var,
                catch_body,
                ..
            } => {
                let body_exit = self.stmts(body, scope.fork());
                // The handler can be entered from any point inside the body,
                // so nothing assigned there (or before) may be trusted.
                let mut catch_scope = scope;
                catch_scope.set_unknown();
                self.touch(catch_var);
                catch_scope.bind(catch_var, VarState::Known(Derivation::Caught));
                let catch_exit = self.stmts(catch_body, catch_scope);
                match (body_exit, catch_exit) {
                    (Some(a), Some(b)) => Some(a.merge(&b)),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                }
            }
            Stmt::Include { target, .. } => {
                self.expr(target, &mut scope);
                // The included script can assign anything.
                scope.set_unknown();
                Some(scope)
            }
        }
    }

    /// Loops get a two-pass treatment: one scratch pass over the body to
    /// discover the continue/break snapshots and mutations, then a real pass
    /// from a header that has those effects folded in. The after-loop scope
    /// additionally merges the zero-iteration entry state and every break.
    fn while_loop(&mut self, cond: &Expr, body: &[Stmt], mut entry: FlowScope) -> FlowScope {
        self.expr(cond, &mut entry);

        let (scratch_id, scratch_scope) = self.flow.enter_loop(&entry);
        let scratch_exit = self.stmts(body, scratch_scope);
        let effects = self.flow.take_loop(scratch_id);

        let mut header = entry.fork();
        for cont in &effects.continue_states {
            header = header.merge_map(cont);
        }
        if let Some(exit) = &scratch_exit {
            header = header.merge(exit);
        }

        let (loop_id, body_scope) = self.flow.reenter_loop(
            &header,
            effects.continue_states.clone(),
            effects.break_states.clone(),
        );
        let real_exit = self.stmts(body, body_scope);
        let effects = self.flow.take_loop(loop_id);

        let mut after = entry.merge(&header);
        if let Some(exit) = real_exit {
            after = after.merge(&exit);
        }
        for brk in &effects.break_states {
            after = after.merge_map(brk);
        }
        after
    }

    fn expr(&mut self, expr: &Expr, scope: &mut FlowScope) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::ConstRef(_) | ExprKind::Regex(_) => {}
            ExprKind::Var(name) => {
                self.touch(name);
                match scope.get(name) {
                    Some(state) if state.is_known() => {}
                    _ => {
                        // Possibly read before assignment: the generated
                        // routine must start this variable at the default.
                        self.summary.get_mut(name).expect("touched").needs_default_init = true;
                        scope.bind(name, VarState::Unknown);
                    }
                }
            }
            ExprKind::Call { args, .. } | ExprKind::New { args, .. } => {
                for arg in args {
                    self.expr(arg, scope);
                }
            }
            ExprKind::Binary { left, right, .. } => {
                self.expr(left, scope);
                self.expr(right, scope);
            }
            ExprKind::Unary { operand, .. } => {
                self.expr(operand, scope);
            }
        }
    }

    fn touch(&mut self, name: &str) {
        self.summary.entry(name.to_string()).or_default();
    }
}
