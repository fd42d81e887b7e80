//! Ordered capability chain used to resolve access decisions.
//!
//! # Purpose
//! An access decision is a sequence of independent checks ("is the caller a
//! platform admin?", "does the caller own the object?", ...). Each check is a
//! [`Capability`] that answers allow, deny, or abstain for one action. The
//! chain asks them in order and stops at the first answer that is not
//! [`Decision::Abstain`].
//!
//! # Key invariants
//! - An exhausted chain denies.
//! - A multi-action request is allowed only if every action is allowed.
//! - Capability errors abort evaluation; they never turn into an allow.
use crate::Action;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    Abstain,
}

/// Outcome of running the chain for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    /// Name of the capability that decided, `None` when the chain ran out.
    pub decided_by: Option<&'static str>,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// One link of a [`CapabilityChain`].
///
/// `C` is the evaluation context the caller resolved up front (subject,
/// object facts, domain); `E` is the caller's error type.
#[async_trait]
pub trait Capability<C: Sync, E>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn decide(&self, ctx: &C, action: Action) -> Result<Decision, E>;
}

pub struct CapabilityChain<C, E> {
    links: Vec<Box<dyn Capability<C, E>>>,
}

impl<C: Sync, E> Default for CapabilityChain<C, E> {
    fn default() -> Self {
        Self { links: Vec::new() }
    }
}

impl<C: Sync, E> CapabilityChain<C, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `link`; links are consulted in insertion order.
    pub fn with(mut self, link: impl Capability<C, E> + 'static) -> Self {
        self.links.push(Box::new(link));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.links.iter().map(|link| link.name()).collect()
    }

    pub async fn decide(&self, ctx: &C, action: Action) -> Result<Verdict, E> {
        for link in &self.links {
            match link.decide(ctx, action).await? {
                Decision::Abstain => continue,
                decision => {
                    return Ok(Verdict {
                        decision,
                        decided_by: Some(link.name()),
                    });
                }
            }
        }
        Ok(Verdict {
            decision: Decision::Deny,
            decided_by: None,
        })
    }

    /// Returns the first action in `actions` that is not allowed, together
    /// with its verdict, or `None` when all of them are allowed.
    pub async fn first_denied(
        &self,
        ctx: &C,
        actions: &[Action],
    ) -> Result<Option<(Action, Verdict)>, E> {
        for action in actions {
            let verdict = self.decide(ctx, *action).await?;
            if !verdict.is_allowed() {
                return Ok(Some((*action, verdict)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        subject: &'static str,
    }

    struct Fixed {
        name: &'static str,
        subject: &'static str,
        action: Action,
        decision: Decision,
    }

    #[async_trait]
    impl Capability<Ctx, String> for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn decide(&self, ctx: &Ctx, action: Action) -> Result<Decision, String> {
            if ctx.subject == self.subject && action == self.action {
                Ok(self.decision)
            } else {
                Ok(Decision::Abstain)
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl Capability<Ctx, String> for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn decide(&self, _ctx: &Ctx, _action: Action) -> Result<Decision, String> {
            Err("backend down".to_string())
        }
    }

    fn chain() -> CapabilityChain<Ctx, String> {
        CapabilityChain::new()
            .with(Fixed {
                name: "first",
                subject: "alice",
                action: Action::Read,
                decision: Decision::Deny,
            })
            .with(Fixed {
                name: "second",
                subject: "alice",
                action: Action::Read,
                decision: Decision::Allow,
            })
            .with(Fixed {
                name: "third",
                subject: "bob",
                action: Action::Read,
                decision: Decision::Allow,
            })
    }

    #[tokio::test]
    async fn first_definitive_answer_wins() {
        let verdict = chain()
            .decide(&Ctx { subject: "alice" }, Action::Read)
            .await
            .expect("decide");
        assert_eq!(verdict.decision, Decision::Deny);
        assert_eq!(verdict.decided_by, Some("first"));

        let verdict = chain()
            .decide(&Ctx { subject: "bob" }, Action::Read)
            .await
            .expect("decide");
        assert!(verdict.is_allowed());
        assert_eq!(verdict.decided_by, Some("third"));
    }

    #[tokio::test]
    async fn exhausted_chain_denies() {
        let verdict = chain()
            .decide(&Ctx { subject: "carol" }, Action::Read)
            .await
            .expect("decide");
        assert_eq!(verdict.decision, Decision::Deny);
        assert_eq!(verdict.decided_by, None);
    }

    #[tokio::test]
    async fn every_action_must_be_allowed() {
        let ctx = Ctx { subject: "bob" };
        let chain = chain();
        assert!(
            chain
                .first_denied(&ctx, &[Action::Read])
                .await
                .expect("check")
                .is_none()
        );
        let (action, verdict) = chain
            .first_denied(&ctx, &[Action::Read, Action::Update])
            .await
            .expect("check")
            .expect("update is denied");
        assert_eq!(action, Action::Update);
        assert_eq!(verdict.decision, Decision::Deny);
    }

    #[tokio::test]
    async fn errors_abort_evaluation() {
        let chain: CapabilityChain<Ctx, String> = CapabilityChain::new().with(Failing);
        let err = chain
            .decide(&Ctx { subject: "alice" }, Action::Read)
            .await
            .expect_err("error propagates");
        assert_eq!(err, "backend down");
        assert_eq!(chain.names(), vec!["failing"]);
    }
}
