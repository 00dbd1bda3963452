// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

//! Abstract query tree, as handed over by a parser. The engine only rewrites
//! and lowers it; building one is the embedder's job.

/// Binary operators. `Not` means "lhs AND NOT rhs".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operator {
    And,
    StrictAnd,
    Or,
    Not,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOperator {
    And,
    StrictAnd,
    Not,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryTerm {
    pub token: String,
}

/// An ordered run of terms: a single token or a quoted phrase. `index` is
/// the position of the first term within the original query, `rep` a
/// repetition count for collapsed duplicate tokens, `flags` an opaque byte
/// handed through to scoring.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Phrase {
    pub terms: Vec<QueryTerm>,
    pub index: u16,
    pub rep: u8,
    pub flags: u8,
}

impl Phrase {
    pub fn new(tokens: &[&str], index: u16) -> Phrase {
        Phrase {
            terms: tokens
                .iter()
                .map(|t| QueryTerm {
                    token: (*t).to_owned(),
                })
                .collect(),
            index,
            rep: 1,
            flags: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.terms.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AstNode {
    Token(Phrase),
    Phrase(Phrase),
    BinOp {
        op: Operator,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<AstNode>,
    },
    /// Evaluates `expr` for its capture side effects but always holds.
    ConstTrueExpr(Box<AstNode>),
    ConstFalse,
    /// Contributes nothing; erased by normalization.
    Dummy,
}

impl AstNode {
    pub fn token(token: &str, index: u16) -> AstNode {
        AstNode::Token(Phrase::new(&[token], index))
    }

    /// A phrase node; a single-token phrase collapses to a token node.
    pub fn phrase(tokens: &[&str], index: u16) -> AstNode {
        if tokens.len() == 1 {
            AstNode::token(tokens[0], index)
        } else {
            AstNode::Phrase(Phrase::new(tokens, index))
        }
    }

    pub fn binop(op: Operator, lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::binop(Operator::And, lhs, rhs)
    }

    pub fn or(lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::binop(Operator::Or, lhs, rhs)
    }

    pub fn and_not(lhs: AstNode, rhs: AstNode) -> AstNode {
        AstNode::binop(Operator::Not, lhs, rhs)
    }

    pub fn set_const_false(&mut self) {
        *self = AstNode::ConstFalse;
    }

    pub fn set_dummy(&mut self) {
        *self = AstNode::Dummy;
    }

    /// True for token and phrase leaves, the cheap nodes the reorder pass
    /// prefers to evaluate first.
    pub fn is_leaf(&self) -> bool {
        match *self {
            AstNode::Token(_) | AstNode::Phrase(_) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub root: Option<Box<AstNode>>,
}

impl Query {
    pub fn new(root: AstNode) -> Query {
        Query {
            root: Some(Box::new(root)),
        }
    }

    pub fn empty() -> Query {
        Query { root: None }
    }

    /// Erases `ConstFalse`/`Dummy` nodes and collapses degenerate operators.
    /// Returns false when nothing evaluable remains.
    pub fn normalize(&mut self) -> bool {
        if let Some(root) = self.root.take() {
            match normalize_node(*root) {
                AstNode::ConstFalse | AstNode::Dummy => {}
                node => self.root = Some(Box::new(node)),
            }
        }
        self.root.is_some()
    }

    /// Token/phrase nodes at least one of which must match any matching
    /// document; their decoders drive the candidate selection loop.
    pub fn leader_phrases(&self) -> Vec<&Phrase> {
        let mut out = Vec::new();
        if let Some(ref root) = self.root {
            collect_leaders(root, &mut out);
        }
        out
    }
}

fn normalize_node(node: AstNode) -> AstNode {
    match node {
        AstNode::BinOp { op, lhs, rhs } => {
            let lhs = normalize_node(*lhs);
            let rhs = normalize_node(*rhs);

            match op {
                Operator::And | Operator::StrictAnd => {
                    if lhs == AstNode::ConstFalse || rhs == AstNode::ConstFalse {
                        AstNode::ConstFalse
                    } else if lhs == AstNode::Dummy {
                        rhs
                    } else if rhs == AstNode::Dummy {
                        lhs
                    } else {
                        AstNode::binop(op, lhs, rhs)
                    }
                }
                Operator::Or => {
                    let lhs_gone = lhs == AstNode::ConstFalse || lhs == AstNode::Dummy;
                    let rhs_gone = rhs == AstNode::ConstFalse || rhs == AstNode::Dummy;
                    if lhs_gone && rhs_gone {
                        AstNode::ConstFalse
                    } else if lhs_gone {
                        rhs
                    } else if rhs_gone {
                        lhs
                    } else {
                        AstNode::binop(op, lhs, rhs)
                    }
                }
                Operator::Not => {
                    if lhs == AstNode::ConstFalse || lhs == AstNode::Dummy {
                        AstNode::ConstFalse
                    } else if rhs == AstNode::ConstFalse || rhs == AstNode::Dummy {
                        lhs
                    } else {
                        AstNode::binop(op, lhs, rhs)
                    }
                }
            }
        }
        AstNode::UnaryOp { op, expr } => match normalize_node(*expr) {
            AstNode::ConstFalse => AstNode::ConstFalse,
            AstNode::Dummy => AstNode::Dummy,
            expr => AstNode::UnaryOp {
                op,
                expr: Box::new(expr),
            },
        },
        AstNode::ConstTrueExpr(expr) => match normalize_node(*expr) {
            AstNode::ConstFalse | AstNode::Dummy => AstNode::Dummy,
            expr => AstNode::ConstTrueExpr(Box::new(expr)),
        },
        leaf => leaf,
    }
}

fn collect_leaders<'a>(node: &'a AstNode, out: &mut Vec<&'a Phrase>) {
    match *node {
        AstNode::Token(ref p) | AstNode::Phrase(ref p) => out.push(p),
        AstNode::BinOp {
            op: Operator::Or,
            ref lhs,
            ref rhs,
        } => {
            collect_leaders(lhs, out);
            collect_leaders(rhs, out);
        }
        AstNode::BinOp {
            op: Operator::Not,
            ref lhs,
            ..
        } => collect_leaders(lhs, out),
        AstNode::BinOp { ref lhs, ref rhs, .. } => {
            // AND: either side suffices; prefer the one evaluated first and
            // fall back when it cannot drive (e.g. a ConstTrueExpr)
            let before = out.len();
            collect_leaders(lhs, out);
            if out.len() == before {
                collect_leaders(rhs, out);
            }
        }
        AstNode::UnaryOp {
            op: UnaryOperator::Not,
            ..
        } => {}
        AstNode::UnaryOp { ref expr, .. } => collect_leaders(expr, out),
        AstNode::ConstTrueExpr(_) | AstNode::ConstFalse | AstNode::Dummy => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_const_false() {
        let mut q = Query::new(AstNode::and(
            AstNode::token("apple", 0),
            AstNode::ConstFalse,
        ));
        assert!(!q.normalize());

        let mut q = Query::new(AstNode::or(
            AstNode::token("apple", 0),
            AstNode::ConstFalse,
        ));
        assert!(q.normalize());
        assert_eq!(*q.root.unwrap(), AstNode::token("apple", 0));

        let mut q = Query::new(AstNode::and_not(
            AstNode::token("apple", 0),
            AstNode::ConstFalse,
        ));
        assert!(q.normalize());
        assert_eq!(*q.root.unwrap(), AstNode::token("apple", 0));

        let mut q = Query::new(AstNode::and_not(
            AstNode::ConstFalse,
            AstNode::token("apple", 0),
        ));
        assert!(!q.normalize());
    }

    #[test]
    fn test_normalize_erases_dummy() {
        let mut q = Query::new(AstNode::and(
            AstNode::Dummy,
            AstNode::token("apple", 0),
        ));
        assert!(q.normalize());
        assert_eq!(*q.root.unwrap(), AstNode::token("apple", 0));

        let mut q = Query::new(AstNode::ConstTrueExpr(Box::new(AstNode::ConstFalse)));
        assert!(!q.normalize());
    }

    #[test]
    fn test_normalize_recurses() {
        // ((pear AND false) OR apple) AND banana -> apple AND banana
        let mut q = Query::new(AstNode::and(
            AstNode::or(
                AstNode::and(AstNode::token("pear", 0), AstNode::ConstFalse),
                AstNode::token("apple", 1),
            ),
            AstNode::token("banana", 2),
        ));
        assert!(q.normalize());
        assert_eq!(
            *q.root.unwrap(),
            AstNode::and(AstNode::token("apple", 1), AstNode::token("banana", 2))
        );
    }

    #[test]
    fn test_leader_phrases() {
        fn tokens_of(q: &Query) -> Vec<String> {
            q.leader_phrases()
                .iter()
                .map(|p| p.terms[0].token.clone())
                .collect()
        }

        // AND drives through its left side only
        let q = Query::new(AstNode::and(
            AstNode::token("apple", 0),
            AstNode::token("phone", 1),
        ));
        assert_eq!(tokens_of(&q), vec!["apple"]);

        // OR needs both sides
        let q = Query::new(AstNode::or(
            AstNode::token("apple", 0),
            AstNode::token("banana", 1),
        ));
        assert_eq!(tokens_of(&q), vec!["apple", "banana"]);

        // NOT drives through its left side
        let q = Query::new(AstNode::and_not(
            AstNode::token("apple", 0),
            AstNode::token("phone", 1),
        ));
        assert_eq!(tokens_of(&q), vec!["apple"]);

        // a ConstTrueExpr cannot drive, AND falls back to the right side
        let q = Query::new(AstNode::and(
            AstNode::ConstTrueExpr(Box::new(AstNode::token("apple", 0))),
            AstNode::token("phone", 1),
        ));
        assert_eq!(tokens_of(&q), vec!["phone"]);
    }
}
