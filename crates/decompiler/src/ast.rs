//! AST node representation.
//!
//! Nodes are a tagged variant with two shared variable-length payloads:
//! `vals` for literal data (variable ids, block ids, label ids, folded
//! constants) and `children` for sub-expression/sub-statement references.
//! Keeping the payloads uniform across variants is what lets the
//! restructuring passes rewrite nodes in place without re-shaping them.
//!
//! Children are arena indices, never direct references: the structuring
//! passes mutate blocks while sibling references are outstanding, and ids
//! stay stable across any amount of in-place rewriting.

/// Index of an inner node in [`crate::abst::Abst::inner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Index of a block in [`crate::abst::Abst::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Statement and expression kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    // Statements
    /// Ordered statement list; every block node is one of these
    Seq,
    /// `vals[0]` is the variable id, `children[0]` the assigned expression
    Assign,
    /// Void native call: `vals[0]` is the native index, children are params
    Send,
    /// Procedure call: `vals[0]` is the callee's block id
    Call,
    Return,
    /// User label: `vals[0]` is the original label block id
    Label,
    /// Internal jump to `vals[0]`; hidden by the time output is rendered
    Goto,
    /// User goto that survives into the output; `vals[0]` is the label id
    ReallyGoto,
    /// `vals` are branch destination blocks, `children` guard expressions.
    /// One more val than children means the last branch is an else.
    If,
    /// `vals = [inner, break, update?]`, `children[0]` is the guard
    Loop,
    Continue,
    Break,

    // Expressions
    /// `vals[0]` is the literal value
    Lit,
    /// `vals[0]` holds IEEE-754 bits of a float literal
    FloatLit,
    /// `vals[0]` is a register id; negative ids are procedure parameters
    Var,
    /// Value-returning native call, laid out like `Send`
    Func,
    Add,
    Sub,
    Mul,
    Div,
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    Neg,
    BitNot,
    BoolNot,
}

impl Tag {
    /// Infix symbol for binary expression tags.
    pub fn binary_symbol(self) -> Option<&'static str> {
        Some(match self {
            Tag::Add => "+",
            Tag::Sub => "-",
            Tag::Mul => "*",
            Tag::Div => "/",
            Tag::Or => "|",
            Tag::And => "&",
            Tag::Eq => "==",
            Tag::Neq => "!=",
            Tag::Lt => "<",
            Tag::Gt => ">",
            Tag::Lte => "<=",
            Tag::Gte => ">=",
            _ => return None,
        })
    }

    /// Prefix symbol for unary expression tags.
    pub fn unary_symbol(self) -> Option<&'static str> {
        Some(match self {
            Tag::Neg => "-",
            Tag::BitNot => "~",
            Tag::BoolNot => "!",
            _ => return None,
        })
    }

    /// Statements that transfer control away from the current block.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Tag::Return
                | Tag::Goto
                | Tag::ReallyGoto
                | Tag::If
                | Tag::Loop
                | Tag::Continue
                | Tag::Break
        )
    }
}

/// Shallow value classification used by boolean simplification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Unknown,
    Int,
    Bool,
    Stmt,
}

/// One AST node. See the module docs for the `vals`/`children` conventions.
#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub tag: Tag,
    pub vals: Vec<i64>,
    pub children: Vec<NodeId>,
    pub ty: ValueType,
}

impl AstNode {
    pub fn new(tag: Tag, vals: Vec<i64>, children: Vec<NodeId>) -> AstNode {
        AstNode { tag, vals, children, ty: ValueType::Unknown }
    }

    /// Overwrite this node with another node's contents, keeping the id.
    pub fn copy_from(&mut self, other: &AstNode) {
        self.tag = other.tag;
        self.vals = other.vals.clone();
        self.children = other.children.clone();
        self.ty = other.ty;
    }

    /// Replace every field at once; used when a pass rewrites a node into a
    /// different kind entirely.
    pub fn update(&mut self, tag: Tag, vals: Vec<i64>, children: Vec<NodeId>, ty: ValueType) {
        self.tag = tag;
        self.vals = vals;
        self.children = children;
        self.ty = ty;
    }

    /// Block id stored at `vals[idx]`.
    pub fn val_block(&self, idx: usize) -> BlockId {
        BlockId(self.vals[idx] as u32)
    }
}

impl std::fmt::Display for AstNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tag: {:?}, type: {:?}, vals: {:?}, children: [{}]",
            self.tag,
            self.ty,
            self.vals,
            self.children.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
        )
    }
}
