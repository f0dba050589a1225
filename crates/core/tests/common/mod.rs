//! A backend that records units as op lists and interprets them, so tests
//! observe the runtime behavior of the emitted code: carrier round trips,
//! block-return dispatch, and the pause/resume protocol included.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_classgen_core::ir::Module;
use wasm_classgen_core::{
    Backend, BlockAnalysis, CarrierShape, LocalId, Opts, PrimOp, ScanAnalysis, Session, Slot,
    TrapReason, UnitId,
};

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Compiles every defined function of `module` into a fresh interpreter.
pub fn compile(module: &Module, opts: Opts, analysis: &dyn BlockAnalysis) -> TestBackend {
    init_logs();
    let mut backend = TestBackend::new();
    let mut session = Session::new(module, opts);
    let first = module.num_imports();
    for i in 0..module.funcs.len() as u32 {
        let index = first + i;
        let unit = session
            .compile_function(index, &mut backend, analysis)
            .expect("compilation failed");
        let sig = module.func_type(index).unwrap();
        backend.define_function(index, unit, sig.params.len(), sig.results.len());
    }
    backend
}

/// Splits every block, deriving local sets by scanning like the stock
/// oracle.
pub struct AlwaysSplit<'a>(ScanAnalysis<'a>);

impl<'a> AlwaysSplit<'a> {
    pub fn new(module: &'a Module) -> AlwaysSplit<'a> {
        AlwaysSplit(ScanAnalysis::new(module))
    }
}

impl BlockAnalysis for AlwaysSplit<'_> {
    fn must_split(&self, _func: u32, _offset: usize) -> bool {
        true
    }

    fn locals_read(&self, func: u32, offset: usize) -> Vec<u32> {
        self.0.locals_read(func, offset)
    }

    fn locals_written(&self, func: u32, offset: usize) -> Vec<u32> {
        self.0.locals_written(func, offset)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Ref(RefVal),
}

impl Value {
    pub fn i32(&self) -> i32 {
        match self {
            Value::I32(v) => *v,
            other => panic!("expected an i32, got {other:?}"),
        }
    }

    pub fn i64(&self) -> i64 {
        match self {
            Value::I64(v) => *v,
            other => panic!("expected an i64, got {other:?}"),
        }
    }

    pub fn f64(&self) -> f64 {
        match self {
            Value::F64(v) => *v,
            other => panic!("expected an f64, got {other:?}"),
        }
    }

    fn zero(slot: Slot) -> Value {
        match slot {
            Slot::Int => Value::I32(0),
            Slot::Long => Value::I64(0),
            Slot::Float => Value::F32(0.0),
            Slot::Double => Value::F64(0.0),
            Slot::Ref => Value::Ref(RefVal::Null),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RefVal {
    Null,
    Carrier(Rc<RefCell<Vec<Value>>>),
    BlockRet(Rc<BlockRet>),
    Layer(Rc<Layer>),
}

#[derive(Debug)]
pub struct BlockRet {
    pub tag: i32,
    pub payload: RefVal,
    pub locals: RefVal,
}

#[derive(Debug)]
pub struct Layer {
    pub point: i32,
    pub stack: RefVal,
    pub locals: RefVal,
    pub heap: RefVal,
}

#[derive(Debug)]
pub enum Outcome {
    Done(Vec<Value>),
    Paused,
    Trapped(TrapReason),
}

impl Outcome {
    pub fn unwrap_done(self) -> Vec<Value> {
        match self {
            Outcome::Done(values) => values,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    pub fn unwrap_i32(self) -> i32 {
        let values = self.unwrap_done();
        assert_eq!(values.len(), 1, "expected a single result");
        values[0].i32()
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Outcome::Paused)
    }
}

pub enum HostResult {
    Values(Vec<Value>),
    Pause,
}

pub type HostFn = Box<dyn FnMut(Vec<Value>) -> HostResult>;

#[derive(Debug, Clone)]
enum Op {
    Jump(u32),
    BranchIf(u32),
    BranchIfNot(u32),
    Switch(Vec<(i32, u32)>, u32),
    Ret,
    Trap(TrapReason),
    CallUnit(UnitId, usize, bool),
    CallFunction(u32, usize, bool),
    CallIndirect(usize, bool),
    Load(LocalId),
    Store(LocalId),
    ConstI32(i32),
    ConstI64(i64),
    ConstF32(f32),
    ConstF64(f64),
    ConstZero(Slot),
    Dup,
    Drop,
    Swap,
    Prim(PrimOp),
    CarrierNew,
    CarrierPut,
    CarrierTake,
    BlockRetNew,
    BlockRetTag,
    BlockRetPayload,
    BlockRetLocals,
    BranchIfResuming(u32),
    ResumeLayer,
    LayerNew,
    LayerPoint,
    LayerStack,
    LayerLocals,
    LayerHeap,
    Pause,
    BranchIfPaused(u32),
    BranchIfPauseRequested(u32),
}

#[derive(Debug)]
struct UnitCode {
    name: String,
    params: usize,
    has_ret: bool,
    locals: u32,
    ops: Vec<Op>,
    labels: HashMap<u32, usize>,
}

#[derive(Debug, Clone, Copy)]
struct FnMeta {
    unit: UnitId,
    params: usize,
    results: usize,
}

pub struct TestBackend {
    units: Vec<Rc<UnitCode>>,
    building: Vec<usize>,
    next_label: u32,
    functions: HashMap<u32, FnMeta>,
    hosts: HashMap<u32, HostFn>,
    pub table: Vec<u32>,
    captured: Vec<Value>,
    resume_chain: Vec<Value>,
    pausing: bool,
    pause_requested: bool,
}

impl TestBackend {
    pub fn new() -> TestBackend {
        TestBackend {
            units: Vec::new(),
            building: Vec::new(),
            next_label: 0,
            functions: HashMap::new(),
            hosts: HashMap::new(),
            table: Vec::new(),
            captured: Vec::new(),
            resume_chain: Vec::new(),
            pausing: false,
            pause_requested: false,
        }
    }

    pub fn define_function(&mut self, func: u32, unit: UnitId, params: usize, results: usize) {
        self.functions.insert(
            func,
            FnMeta {
                unit,
                params,
                results,
            },
        );
    }

    pub fn define_host(&mut self, func: u32, host: HostFn) {
        self.hosts.insert(func, host);
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn unit_names(&self) -> Vec<&str> {
        self.units.iter().map(|unit| unit.name.as_str()).collect()
    }

    pub fn captured_layers(&self) -> usize {
        self.captured.len()
    }

    /// Asks running code to pause at its next loop back-edge.
    pub fn request_pause(&mut self) {
        self.pause_requested = true;
    }

    pub fn run(&mut self, func: u32, args: Vec<Value>) -> Outcome {
        let meta = *self.functions.get(&func).expect("function not defined");
        assert_eq!(args.len(), meta.params, "argument count mismatch");
        match self.exec(meta.unit, args) {
            Err(reason) => Outcome::Trapped(reason),
            Ok(ret) => {
                if self.pausing {
                    self.pausing = false;
                    return Outcome::Paused;
                }
                let values = match meta.results {
                    0 => Vec::new(),
                    1 => vec![ret.expect("missing return value")],
                    n => {
                        let carrier = match ret.expect("missing result carrier") {
                            Value::Ref(RefVal::Carrier(carrier)) => carrier,
                            other => panic!("expected a result carrier, got {other:?}"),
                        };
                        let mut inner = carrier.borrow_mut();
                        let mut out = Vec::with_capacity(n);
                        for _ in 0..n {
                            out.push(inner.pop().expect("missing result"));
                        }
                        out
                    }
                };
                Outcome::Done(values)
            }
        }
    }

    /// Re-invokes `func` with the layers captured by the last pause.
    pub fn resume(&mut self, func: u32) -> Outcome {
        assert!(self.resume_chain.is_empty(), "resume already in progress");
        assert!(!self.captured.is_empty(), "nothing to resume");
        self.resume_chain = std::mem::take(&mut self.captured);
        let meta = *self.functions.get(&func).expect("function not defined");
        let args = vec![Value::I32(0); meta.params];
        self.run(func, args)
    }

    fn invoke_function(
        &mut self,
        func: u32,
        args: Vec<Value>,
        has_ret: bool,
        stack: &mut Vec<Value>,
    ) -> Result<(), TrapReason> {
        if let Some(meta) = self.functions.get(&func).copied() {
            let ret = self.exec(meta.unit, args)?;
            if self.pausing {
                return Ok(());
            }
            if has_ret {
                stack.push(ret.expect("missing return value"));
            }
            return Ok(());
        }
        let host = self.hosts.get_mut(&func).expect("unknown function index");
        match host(args) {
            HostResult::Pause => self.pausing = true,
            HostResult::Values(values) => match values.len() {
                0 => {}
                1 => stack.push(values.into_iter().next().unwrap()),
                _ => {
                    // Multi-value results travel as a carrier, packed the way
                    // compiled callees pack theirs: first result last.
                    let inner: Vec<Value> = values.into_iter().rev().collect();
                    stack.push(Value::Ref(RefVal::Carrier(Rc::new(RefCell::new(inner)))));
                }
            },
        }
        Ok(())
    }

    fn exec(&mut self, unit: UnitId, args: Vec<Value>) -> Result<Option<Value>, TrapReason> {
        let code = self.units[unit.0 as usize].clone();
        let mut locals = args;
        locals.resize(code.locals as usize, Value::Ref(RefVal::Null));
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;
        loop {
            let op = &code.ops[pc];
            pc += 1;
            match op {
                Op::Jump(label) => pc = code.labels[label],
                Op::BranchIf(label) => {
                    if pop_i32(&mut stack) != 0 {
                        pc = code.labels[label];
                    }
                }
                Op::BranchIfNot(label) => {
                    if pop_i32(&mut stack) == 0 {
                        pc = code.labels[label];
                    }
                }
                Op::Switch(arms, default) => {
                    let scrutinee = pop_i32(&mut stack);
                    let target = arms
                        .iter()
                        .find(|(key, _)| *key == scrutinee)
                        .map(|(_, label)| *label)
                        .unwrap_or(*default);
                    pc = code.labels[&target];
                }
                Op::Ret => {
                    return Ok(if code.has_ret {
                        Some(stack.pop().expect("missing return value"))
                    } else {
                        None
                    })
                }
                Op::Trap(reason) => return Err(*reason),
                Op::CallUnit(target, params, has_ret) => {
                    let args = stack.split_off(stack.len() - params);
                    let ret = self.exec(*target, args)?;
                    if !self.pausing && *has_ret {
                        stack.push(ret.expect("missing unit return value"));
                    }
                }
                Op::CallFunction(func, params, has_ret) => {
                    let args = stack.split_off(stack.len() - params);
                    self.invoke_function(*func, args, *has_ret, &mut stack)?;
                }
                Op::CallIndirect(params, has_ret) => {
                    let index = pop_i32(&mut stack);
                    let args = stack.split_off(stack.len() - params);
                    let func = *self
                        .table
                        .get(index as usize)
                        .ok_or(TrapReason::BadIndirectCall)?;
                    self.invoke_function(func, args, *has_ret, &mut stack)?;
                }
                Op::Load(local) => stack.push(locals[*local as usize].clone()),
                Op::Store(local) => {
                    locals[*local as usize] = stack.pop().expect("missing store operand")
                }
                Op::ConstI32(val) => stack.push(Value::I32(*val)),
                Op::ConstI64(val) => stack.push(Value::I64(*val)),
                Op::ConstF32(val) => stack.push(Value::F32(*val)),
                Op::ConstF64(val) => stack.push(Value::F64(*val)),
                Op::ConstZero(slot) => stack.push(Value::zero(*slot)),
                Op::Dup => {
                    let top = stack.last().cloned().expect("missing dup operand");
                    stack.push(top);
                }
                Op::Drop => {
                    stack.pop().expect("missing drop operand");
                }
                Op::Swap => {
                    let len = stack.len();
                    stack.swap(len - 1, len - 2);
                }
                Op::Prim(op) => prim(&mut stack, *op)?,
                Op::CarrierNew => stack.push(Value::Ref(RefVal::Carrier(Rc::new(RefCell::new(
                    Vec::new(),
                ))))),
                Op::CarrierPut => {
                    let value = stack.pop().expect("missing carrier value");
                    carrier_of(stack.last().expect("missing carrier"))
                        .borrow_mut()
                        .push(value);
                }
                Op::CarrierTake => {
                    let value = carrier_of(stack.last().expect("missing carrier"))
                        .borrow_mut()
                        .pop()
                        .expect("carrier underflow");
                    stack.push(value);
                }
                Op::BlockRetNew => {
                    let locals_carrier = pop_ref(&mut stack);
                    let payload = pop_ref(&mut stack);
                    let tag = pop_i32(&mut stack);
                    stack.push(Value::Ref(RefVal::BlockRet(Rc::new(BlockRet {
                        tag,
                        payload,
                        locals: locals_carrier,
                    }))));
                }
                Op::BlockRetTag => {
                    let ret = pop_blockret(&mut stack);
                    stack.push(Value::I32(ret.tag));
                }
                Op::BlockRetPayload => {
                    let ret = pop_blockret(&mut stack);
                    stack.push(Value::Ref(ret.payload.clone()));
                }
                Op::BlockRetLocals => {
                    let ret = pop_blockret(&mut stack);
                    stack.push(Value::Ref(ret.locals.clone()));
                }
                Op::BranchIfResuming(label) => {
                    if !self.resume_chain.is_empty() {
                        pc = code.labels[label];
                    }
                }
                Op::ResumeLayer => {
                    let layer = self.resume_chain.pop().expect("no layer to resume");
                    stack.push(layer);
                }
                Op::LayerNew => {
                    let heap = pop_ref(&mut stack);
                    let locals_carrier = pop_ref(&mut stack);
                    let point = pop_i32(&mut stack);
                    let stack_carrier = pop_ref(&mut stack);
                    stack.push(Value::Ref(RefVal::Layer(Rc::new(Layer {
                        point,
                        stack: stack_carrier,
                        locals: locals_carrier,
                        heap,
                    }))));
                }
                Op::LayerPoint => {
                    let layer = pop_layer(&mut stack);
                    stack.push(Value::I32(layer.point));
                }
                Op::LayerStack => {
                    let layer = pop_layer(&mut stack);
                    stack.push(Value::Ref(layer.stack.clone()));
                }
                Op::LayerLocals => {
                    let layer = pop_layer(&mut stack);
                    stack.push(Value::Ref(layer.locals.clone()));
                }
                Op::LayerHeap => {
                    let layer = pop_layer(&mut stack);
                    stack.push(Value::Ref(layer.heap.clone()));
                }
                Op::Pause => {
                    let layer = stack.pop().expect("missing layer");
                    self.captured.push(layer);
                    self.pausing = true;
                    return Ok(None);
                }
                Op::BranchIfPaused(label) => {
                    if self.pausing {
                        pc = code.labels[label];
                    }
                }
                Op::BranchIfPauseRequested(label) => {
                    if self.pause_requested {
                        self.pause_requested = false;
                        pc = code.labels[label];
                    }
                }
            }
        }
    }

    fn cur(&mut self) -> &mut UnitCode {
        let index = *self.building.last().expect("no unit under construction");
        Rc::get_mut(&mut self.units[index]).expect("finished unit modified")
    }

    fn push(&mut self, op: Op) {
        self.cur().ops.push(op);
    }
}

impl Backend for TestBackend {
    type Label = u32;

    fn begin_unit(&mut self, name: &str, params: &[Slot], ret: Option<Slot>) -> UnitId {
        let index = self.units.len();
        self.units.push(Rc::new(UnitCode {
            name: name.to_string(),
            params: params.len(),
            has_ret: ret.is_some(),
            locals: params.len() as u32,
            ops: Vec::new(),
            labels: HashMap::new(),
        }));
        self.building.push(index);
        UnitId(index as u32)
    }

    fn end_unit(&mut self) {
        self.building.pop().expect("no unit under construction");
    }

    fn call_unit(&mut self, unit: UnitId, params: &[Slot], ret: Option<Slot>) {
        self.push(Op::CallUnit(unit, params.len(), ret.is_some()));
    }

    fn call_function(&mut self, func: u32, params: &[Slot], ret: Option<Slot>) {
        self.push(Op::CallFunction(func, params.len(), ret.is_some()));
    }

    fn call_indirect(&mut self, _ty: u32, params: &[Slot], ret: Option<Slot>) {
        self.push(Op::CallIndirect(params.len(), ret.is_some()));
    }

    fn new_label(&mut self) -> u32 {
        self.next_label += 1;
        self.next_label - 1
    }

    fn place_label(&mut self, label: u32) {
        let pc = self.cur().ops.len();
        self.cur().labels.insert(label, pc);
    }

    fn jump(&mut self, target: u32) {
        self.push(Op::Jump(target));
    }

    fn branch_if(&mut self, target: u32) {
        self.push(Op::BranchIf(target));
    }

    fn branch_if_not(&mut self, target: u32) {
        self.push(Op::BranchIfNot(target));
    }

    fn switch(&mut self, arms: &[(i32, u32)], default: u32) {
        self.push(Op::Switch(arms.to_vec(), default));
    }

    fn ret(&mut self) {
        self.push(Op::Ret);
    }

    fn trap(&mut self, reason: TrapReason) {
        self.push(Op::Trap(reason));
    }

    fn alloc_local(&mut self, _slot: Slot) -> LocalId {
        let unit = self.cur();
        unit.locals += 1;
        unit.locals - 1
    }

    fn free_local(&mut self, _local: LocalId) {}

    fn load_local(&mut self, local: LocalId) {
        self.push(Op::Load(local));
    }

    fn store_local(&mut self, local: LocalId) {
        self.push(Op::Store(local));
    }

    fn const_i32(&mut self, val: i32) {
        self.push(Op::ConstI32(val));
    }

    fn const_i64(&mut self, val: i64) {
        self.push(Op::ConstI64(val));
    }

    fn const_f32(&mut self, val: f32) {
        self.push(Op::ConstF32(val));
    }

    fn const_f64(&mut self, val: f64) {
        self.push(Op::ConstF64(val));
    }

    fn const_zero(&mut self, slot: Slot) {
        self.push(Op::ConstZero(slot));
    }

    fn dup(&mut self, _slot: Slot) {
        self.push(Op::Dup);
    }

    fn drop_value(&mut self, _slot: Slot) {
        self.push(Op::Drop);
    }

    fn swap(&mut self, _top: Slot, _below: Slot) {
        self.push(Op::Swap);
    }

    fn primitive(&mut self, op: PrimOp) {
        self.push(Op::Prim(op));
    }

    fn carrier_new(&mut self, _shape: &CarrierShape) {
        self.push(Op::CarrierNew);
    }

    fn carrier_put(&mut self, _slot: Slot) {
        self.push(Op::CarrierPut);
    }

    fn carrier_take(&mut self, _slot: Slot) {
        self.push(Op::CarrierTake);
    }

    fn blockret_new(&mut self) {
        self.push(Op::BlockRetNew);
    }

    fn blockret_tag(&mut self) {
        self.push(Op::BlockRetTag);
    }

    fn blockret_payload(&mut self) {
        self.push(Op::BlockRetPayload);
    }

    fn blockret_locals(&mut self) {
        self.push(Op::BlockRetLocals);
    }

    fn branch_if_resuming(&mut self, target: u32) {
        self.push(Op::BranchIfResuming(target));
    }

    fn resume_layer(&mut self) {
        self.push(Op::ResumeLayer);
    }

    fn layer_new(&mut self) {
        self.push(Op::LayerNew);
    }

    fn layer_point(&mut self) {
        self.push(Op::LayerPoint);
    }

    fn layer_stack(&mut self) {
        self.push(Op::LayerStack);
    }

    fn layer_locals(&mut self) {
        self.push(Op::LayerLocals);
    }

    fn layer_heap(&mut self) {
        self.push(Op::LayerHeap);
    }

    fn pause(&mut self) {
        self.push(Op::Pause);
    }

    fn branch_if_paused(&mut self, target: u32) {
        self.push(Op::BranchIfPaused(target));
    }

    fn branch_if_pause_requested(&mut self, target: u32) {
        self.push(Op::BranchIfPauseRequested(target));
    }
}

fn pop_i32(stack: &mut Vec<Value>) -> i32 {
    stack.pop().expect("missing int operand").i32()
}

fn pop_i64(stack: &mut Vec<Value>) -> i64 {
    stack.pop().expect("missing long operand").i64()
}

fn pop_f32(stack: &mut Vec<Value>) -> f32 {
    match stack.pop().expect("missing float operand") {
        Value::F32(v) => v,
        other => panic!("expected an f32, got {other:?}"),
    }
}

fn pop_f64(stack: &mut Vec<Value>) -> f64 {
    stack.pop().expect("missing double operand").f64()
}

fn pop_ref(stack: &mut Vec<Value>) -> RefVal {
    match stack.pop().expect("missing reference operand") {
        Value::Ref(r) => r,
        other => panic!("expected a reference, got {other:?}"),
    }
}

fn pop_blockret(stack: &mut Vec<Value>) -> Rc<BlockRet> {
    match pop_ref(stack) {
        RefVal::BlockRet(ret) => ret,
        other => panic!("expected a block return, got {other:?}"),
    }
}

fn pop_layer(stack: &mut Vec<Value>) -> Rc<Layer> {
    match pop_ref(stack) {
        RefVal::Layer(layer) => layer,
        other => panic!("expected a layer, got {other:?}"),
    }
}

fn carrier_of(value: &Value) -> Rc<RefCell<Vec<Value>>> {
    match value {
        Value::Ref(RefVal::Carrier(carrier)) => carrier.clone(),
        other => panic!("expected a carrier, got {other:?}"),
    }
}

fn prim(stack: &mut Vec<Value>, op: PrimOp) -> Result<(), TrapReason> {
    use PrimOp::*;
    match op {
        IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | IShl | IShr | IUshr | ICmpEq
        | ICmpNe | ICmpLtS | ICmpLtU | ICmpGtS | ICmpGtU | ICmpLeS | ICmpLeU | ICmpGeS
        | ICmpGeU => {
            let b = pop_i32(stack);
            let a = pop_i32(stack);
            let result = match op {
                IAdd => a.wrapping_add(b),
                ISub => a.wrapping_sub(b),
                IMul => a.wrapping_mul(b),
                IDiv => {
                    if b == 0 {
                        return Err(TrapReason::DivideByZero);
                    }
                    a.wrapping_div(b)
                }
                IRem => {
                    if b == 0 {
                        return Err(TrapReason::DivideByZero);
                    }
                    a.wrapping_rem(b)
                }
                IAnd => a & b,
                IOr => a | b,
                IXor => a ^ b,
                IShl => a.wrapping_shl(b as u32),
                IShr => a.wrapping_shr(b as u32),
                IUshr => ((a as u32).wrapping_shr(b as u32)) as i32,
                ICmpEq => (a == b) as i32,
                ICmpNe => (a != b) as i32,
                ICmpLtS => (a < b) as i32,
                ICmpLtU => ((a as u32) < b as u32) as i32,
                ICmpGtS => (a > b) as i32,
                ICmpGtU => (a as u32 > b as u32) as i32,
                ICmpLeS => (a <= b) as i32,
                ICmpLeU => (a as u32 <= b as u32) as i32,
                ICmpGeS => (a >= b) as i32,
                ICmpGeU => (a as u32 >= b as u32) as i32,
                _ => unreachable!(),
            };
            stack.push(Value::I32(result));
        }
        LAdd | LSub | LMul | LAnd => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            let result = match op {
                LAdd => a.wrapping_add(b),
                LSub => a.wrapping_sub(b),
                LMul => a.wrapping_mul(b),
                LAnd => a & b,
                _ => unreachable!(),
            };
            stack.push(Value::I64(result));
        }
        LCmpEq | LCmpNe | LCmpLtS => {
            let b = pop_i64(stack);
            let a = pop_i64(stack);
            let result = match op {
                LCmpEq => (a == b) as i32,
                LCmpNe => (a != b) as i32,
                LCmpLtS => (a < b) as i32,
                _ => unreachable!(),
            };
            stack.push(Value::I32(result));
        }
        FAdd | FMul => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            let result = match op {
                FAdd => a + b,
                FMul => a * b,
                _ => unreachable!(),
            };
            stack.push(Value::F32(result));
        }
        FCmpEq | FCmpLt => {
            let b = pop_f32(stack);
            let a = pop_f32(stack);
            let result = match op {
                FCmpEq => (a == b) as i32,
                FCmpLt => (a < b) as i32,
                _ => unreachable!(),
            };
            stack.push(Value::I32(result));
        }
        DAdd | DSub | DMul | DDiv => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            let result = match op {
                DAdd => a + b,
                DSub => a - b,
                DMul => a * b,
                DDiv => a / b,
                _ => unreachable!(),
            };
            stack.push(Value::F64(result));
        }
        DCmpEq | DCmpLt => {
            let b = pop_f64(stack);
            let a = pop_f64(stack);
            let result = match op {
                DCmpEq => (a == b) as i32,
                DCmpLt => (a < b) as i32,
                _ => unreachable!(),
            };
            stack.push(Value::I32(result));
        }
        DNeg => {
            let a = pop_f64(stack);
            stack.push(Value::F64(-a));
        }
        I2L => {
            let a = pop_i32(stack);
            stack.push(Value::I64(a as i64));
        }
        L2I => {
            let a = pop_i64(stack);
            stack.push(Value::I32(a as i32));
        }
        F2D => {
            let a = pop_f32(stack);
            stack.push(Value::F64(a as f64));
        }
        D2F => {
            let a = pop_f64(stack);
            stack.push(Value::F32(a as f32));
        }
        I2D => {
            let a = pop_i32(stack);
            stack.push(Value::F64(a as f64));
        }
        D2I => {
            let a = pop_f64(stack);
            stack.push(Value::I32(a as i32));
        }
    }
    Ok(())
}

/// Shorthand constructors for building test function bodies.
pub mod build {
    use wasm_classgen_core::ir::{BlockType, Inst, NumOp, PlainOp};

    pub fn i32c(val: i32) -> Inst {
        Inst::Plain(PlainOp::I32Const(val))
    }

    pub fn i64c(val: i64) -> Inst {
        Inst::Plain(PlainOp::I64Const(val))
    }

    pub fn f64c(val: f64) -> Inst {
        Inst::Plain(PlainOp::F64Const(val))
    }

    pub fn get(index: u32) -> Inst {
        Inst::Plain(PlainOp::LocalGet(index))
    }

    pub fn set(index: u32) -> Inst {
        Inst::Plain(PlainOp::LocalSet(index))
    }

    pub fn tee(index: u32) -> Inst {
        Inst::Plain(PlainOp::LocalTee(index))
    }

    pub fn num(op: NumOp) -> Inst {
        Inst::Plain(PlainOp::Num(op))
    }

    pub fn block(ty: BlockType) -> Inst {
        Inst::Block { ty }
    }

    pub fn loop_(ty: BlockType) -> Inst {
        Inst::Loop { ty }
    }

    pub fn if_(ty: BlockType) -> Inst {
        Inst::If { ty }
    }

    pub fn br(depth: u32) -> Inst {
        Inst::Br { depth }
    }

    pub fn br_if(depth: u32) -> Inst {
        Inst::BrIf { depth }
    }

    pub fn call(func: u32) -> Inst {
        Inst::Call { func }
    }
}
