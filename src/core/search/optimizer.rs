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

use core::search::exec::{RuntimeCtx, COST_NEVER};
use core::search::query::{AstNode, Operator, Query};

use std::mem;

/// Rewrites the query to evaluate cheap nodes first and to fold subtrees
/// that can never match. Returns false when nothing evaluable remains.
///
/// Two passes run to fixpoint: a structural reorder that needs no index
/// statistics, then a cost pass driven by per-term document frequencies,
/// re-normalizing whenever a node was folded.
pub fn optimize(query: &mut Query, rctx: &mut RuntimeCtx) -> bool {
    if let Some(root) = query.root.take() {
        let mut node = *root;
        loop {
            let mut dirty = false;
            node = reorder_node(node, &mut dirty);
            if !dirty {
                break;
            }
        }
        query.root = Some(Box::new(node));
    }

    loop {
        let mut updates = false;
        match query.root {
            Some(ref mut root) => {
                cost_pass(root, rctx, &mut updates);
            }
            None => return false,
        }

        if !updates {
            break;
        }
        if !query.normalize() {
            return false;
        }
    }
    query.root.is_some()
}

fn is_binop(node: &AstNode) -> bool {
    match *node {
        AstNode::BinOp { .. } => true,
        _ => false,
    }
}

// Heuristic pass: for AND, evaluate a leaf before a binop so short circuits
// fire sooner; for `(leaf AND binop) NOT leaf`, push the NOT down onto the
// cheap pair, e.g.
//   ((pizza AND (sf OR "san francisco")) NOT onions)
//   => ((pizza NOT onions) AND (sf OR "san francisco"))
fn reorder_node(node: AstNode, dirty: &mut bool) -> AstNode {
    match node {
        AstNode::BinOp { op, lhs, rhs } => {
            let lhs = reorder_node(*lhs, dirty);
            let rhs = reorder_node(*rhs, dirty);

            match op {
                Operator::And | Operator::StrictAnd => {
                    if is_binop(&lhs) && rhs.is_leaf() {
                        *dirty = true;
                        AstNode::binop(op, rhs, lhs)
                    } else {
                        AstNode::binop(op, lhs, rhs)
                    }
                }
                Operator::Not => {
                    if rhs.is_leaf() {
                        match lhs {
                            AstNode::BinOp {
                                op: inner_op,
                                lhs: inner_lhs,
                                rhs: inner_rhs,
                            } => {
                                let rewrite = (inner_op == Operator::And
                                    || inner_op == Operator::StrictAnd)
                                    && inner_lhs.is_leaf()
                                    && is_binop(&inner_rhs);
                                if rewrite {
                                    *dirty = true;
                                    AstNode::binop(
                                        inner_op,
                                        AstNode::binop(Operator::Not, *inner_lhs, rhs),
                                        *inner_rhs,
                                    )
                                } else {
                                    AstNode::binop(
                                        op,
                                        AstNode::BinOp {
                                            op: inner_op,
                                            lhs: inner_lhs,
                                            rhs: inner_rhs,
                                        },
                                        rhs,
                                    )
                                }
                            }
                            other => AstNode::binop(op, other, rhs),
                        }
                    } else {
                        AstNode::binop(op, lhs, rhs)
                    }
                }
                _ => AstNode::binop(op, lhs, rhs),
            }
        }
        AstNode::UnaryOp { op, expr } => AstNode::UnaryOp {
            op,
            expr: Box::new(reorder_node(*expr, dirty)),
        },
        AstNode::ConstTrueExpr(expr) => {
            AstNode::ConstTrueExpr(Box::new(reorder_node(*expr, dirty)))
        }
        leaf => leaf,
    }
}

enum Outcome {
    Cost(u32),
    Fold,
    FoldDummy,
}

// Cost pass: leaves cost their document frequency (COST_NEVER for absent
// terms), binops put the cheaper side first, AND/OR fold to ConstFalse when
// no child can match. A folded ConstTrueExpr degrades to Dummy since only
// its side effects mattered.
fn cost_pass(node: &mut AstNode, rctx: &mut RuntimeCtx, updates: &mut bool) -> u32 {
    let outcome = match *node {
        AstNode::Token(ref p) => {
            let cost = rctx.token_eval_cost(&p.terms[0].token);
            if cost == COST_NEVER {
                Outcome::Fold
            } else {
                Outcome::Cost(cost)
            }
        }
        AstNode::Phrase(ref p) => {
            let cost = rctx.phrase_eval_cost(p);
            if cost == COST_NEVER {
                Outcome::Fold
            } else {
                Outcome::Cost(cost)
            }
        }
        AstNode::BinOp {
            op,
            ref mut lhs,
            ref mut rhs,
        } => {
            let lhs_cost = cost_pass(lhs, rctx, updates);
            if lhs_cost == COST_NEVER
                && (op == Operator::And || op == Operator::StrictAnd)
            {
                Outcome::Fold
            } else {
                let rhs_cost = cost_pass(rhs, rctx, updates);
                if lhs_cost == COST_NEVER && rhs_cost == COST_NEVER && op == Operator::Or {
                    Outcome::Fold
                } else {
                    if rhs_cost < lhs_cost && op != Operator::Not {
                        mem::swap(lhs, rhs);
                    }
                    Outcome::Cost(lhs_cost.saturating_add(rhs_cost))
                }
            }
        }
        AstNode::UnaryOp { ref mut expr, .. } => {
            let cost = cost_pass(expr, rctx, updates);
            if cost == COST_NEVER {
                Outcome::Fold
            } else {
                Outcome::Cost(cost)
            }
        }
        AstNode::ConstTrueExpr(ref mut expr) => {
            let cost = cost_pass(expr, rctx, updates);
            if cost == COST_NEVER {
                Outcome::FoldDummy
            } else {
                // never worth swapping in front of a real predicate
                Outcome::Cost(COST_NEVER - 1)
            }
        }
        AstNode::ConstFalse => Outcome::Cost(COST_NEVER),
        AstNode::Dummy => Outcome::Cost(0),
    };

    match outcome {
        Outcome::Cost(cost) => cost,
        Outcome::Fold => {
            node.set_const_false();
            *updates = true;
            COST_NEVER
        }
        Outcome::FoldDummy => {
            node.set_dummy();
            *updates = true;
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::search::tests::tiny_source;

    fn optimized(root: AstNode) -> Query {
        let source = tiny_source();
        let mut rctx = RuntimeCtx::new(&source);
        let mut q = Query::new(root);
        q.normalize();
        optimize(&mut q, &mut rctx);
        q
    }

    #[test]
    fn test_unknown_terms_fold_to_const_false() {
        // (apple OR banana) AND (phone OR pear), pear unknown
        // -> phone is cheaper than the OR, so it also moves in front
        let q = optimized(AstNode::and(
            AstNode::or(AstNode::token("apple", 0), AstNode::token("banana", 1)),
            AstNode::or(AstNode::token("phone", 2), AstNode::token("pear", 3)),
        ));

        assert_eq!(
            *q.root.unwrap(),
            AstNode::and(
                AstNode::token("phone", 2),
                AstNode::or(AstNode::token("apple", 0), AstNode::token("banana", 1)),
            )
        );
    }

    #[test]
    fn test_unsatisfiable_query_is_empty() {
        let q = optimized(AstNode::and(
            AstNode::token("apple", 0),
            AstNode::token("pear", 1),
        ));
        assert!(q.root.is_none());

        let q = optimized(AstNode::token("pear", 0));
        assert!(q.root.is_none());
    }

    #[test]
    fn test_pure_not_side_is_dropped() {
        // apple NOT pear -> apple (nothing to subtract)
        let q = optimized(AstNode::and_not(
            AstNode::token("apple", 0),
            AstNode::token("pear", 1),
        ));
        assert_eq!(*q.root.unwrap(), AstNode::token("apple", 0));
    }

    #[test]
    fn test_reorder_puts_leaf_first() {
        let mut dirty = false;
        let node = reorder_node(
            AstNode::and(
                AstNode::or(AstNode::token("a", 0), AstNode::token("b", 1)),
                AstNode::token("c", 2),
            ),
            &mut dirty,
        );
        assert!(dirty);
        assert_eq!(
            node,
            AstNode::and(
                AstNode::token("c", 2),
                AstNode::or(AstNode::token("a", 0), AstNode::token("b", 1)),
            )
        );
    }

    #[test]
    fn test_reorder_pushes_not_down() {
        let mut dirty = false;
        let node = reorder_node(
            AstNode::and_not(
                AstNode::and(
                    AstNode::token("pizza", 0),
                    AstNode::or(AstNode::token("sf", 1), AstNode::token("bay", 2)),
                ),
                AstNode::token("onions", 3),
            ),
            &mut dirty,
        );
        assert!(dirty);
        assert_eq!(
            node,
            AstNode::and(
                AstNode::and_not(AstNode::token("pizza", 0), AstNode::token("onions", 3)),
                AstNode::or(AstNode::token("sf", 1), AstNode::token("bay", 2)),
            )
        );
    }

    #[test]
    fn test_cost_orders_by_frequency() {
        // both terms occur twice in the tiny source, no swap; make one rarer
        // by using a phrase pair instead
        let q = optimized(AstNode::or(
            AstNode::and(AstNode::token("apple", 0), AstNode::token("banana", 1)),
            AstNode::token("phone", 2),
        ));

        // the lone token costs 2, the AND costs 4, so OR flips them
        assert_eq!(
            *q.root.unwrap(),
            AstNode::or(
                AstNode::token("phone", 2),
                AstNode::and(AstNode::token("apple", 0), AstNode::token("banana", 1)),
            )
        );
    }
}
