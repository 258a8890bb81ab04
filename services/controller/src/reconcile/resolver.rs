//! Role-template inheritance resolution.
//!
//! Flattens the composition graph below one template into a name -> template
//! map. Traversal is an explicit depth-first walk: `path` holds the templates
//! currently being expanded and `resolved` the finished ones, so re-entering a
//! name on `path` is a cycle while meeting a finished name is just a diamond.
use super::{Manager, ReconcileError, ReconcileResult};
use crate::model::{ObjectKey, Resource, RoleTemplate};
use crate::store::StoreError;
use std::collections::BTreeMap;

struct Frame {
    template: RoleTemplate,
    next_child: usize,
}

impl Manager {
    /// Resolve `name` and everything it composes, transitively.
    ///
    /// # Errors
    /// - `TemplateNotFound` when `name` or any composed name is missing.
    /// - `Cycle` carrying the full loop (first and last entries equal).
    /// - `Store` when a lookup fails for any other reason.
    ///
    /// Nothing partial is ever returned.
    pub async fn gather_roles(&self, name: &str) -> ReconcileResult<BTreeMap<String, RoleTemplate>> {
        let mut resolved: BTreeMap<String, RoleTemplate> = BTreeMap::new();
        let root = self.fetch_template(name).await?;
        let mut path = vec![root.metadata.name.clone()];
        let mut stack = vec![Frame {
            template: root,
            next_child: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame
                .template
                .role_template_names
                .get(frame.next_child)
                .cloned()
            else {
                if let Some(done) = stack.pop() {
                    path.pop();
                    resolved.insert(done.template.metadata.name.clone(), done.template);
                }
                continue;
            };
            frame.next_child += 1;

            if resolved.contains_key(&child) {
                continue;
            }
            if let Some(start) = path.iter().position(|visiting| *visiting == child) {
                let mut cycle = path[start..].to_vec();
                cycle.push(child);
                tracing::warn!(template = name, cycle = ?cycle, "role template cycle detected");
                return Err(ReconcileError::Cycle(cycle));
            }

            let template = self.fetch_template(&child).await?;
            path.push(child);
            stack.push(Frame {
                template,
                next_child: 0,
            });
        }

        tracing::debug!(template = name, resolved = resolved.len(), "resolved role template");
        Ok(resolved)
    }

    async fn fetch_template(&self, name: &str) -> ReconcileResult<RoleTemplate> {
        let key = ObjectKey::cluster(name);
        match self.bounded(self.store().role_templates().get(&key)).await {
            Ok(template) => Ok(template),
            Err(StoreError::NotFound(_)) => Err(ReconcileError::TemplateNotFound(name.to_string())),
            Err(err) => Err(ReconcileError::store(
                "get",
                RoleTemplate::KIND,
                name,
                "cluster",
                err,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::RoleTemplate;
    use crate::reconcile::{Manager, ReconcileError};
    use crate::store::ClusterStore;
    use crate::store::memory::InMemoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use vesta_authz::PolicyRule;

    async fn manager_with(templates: Vec<RoleTemplate>) -> Manager {
        let store = Arc::new(InMemoryStore::default());
        for template in templates {
            store.role_templates().create(template).await.expect("template");
        }
        Manager::new(store, "local", Duration::from_secs(1))
    }

    fn template(name: &str, children: &[&str]) -> RoleTemplate {
        RoleTemplate::new(name, vec![PolicyRule::new(["get"], ["pods"])])
            .inheriting(children.iter().copied())
    }

    #[tokio::test]
    async fn diamond_resolves_each_template_once() {
        let manager = manager_with(vec![
            template("top", &["left", "right"]),
            template("left", &["base"]),
            template("right", &["base"]),
            template("base", &[]),
        ])
        .await;
        let resolved = manager.gather_roles("top").await.expect("resolve");
        let names: Vec<_> = resolved.keys().map(String::as_str).collect();
        assert_eq!(names, ["base", "left", "right", "top"]);
    }

    #[tokio::test]
    async fn cycle_is_reported_with_full_path() {
        let manager = manager_with(vec![
            template("a", &["b"]),
            template("b", &["c"]),
            template("c", &["a"]),
        ])
        .await;
        let err = manager.gather_roles("a").await.expect_err("cycle");
        match err {
            ReconcileError::Cycle(path) => assert_eq!(path, ["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn self_reference_is_a_cycle() {
        let manager = manager_with(vec![template("loop", &["loop"])]).await;
        let err = manager.gather_roles("loop").await.expect_err("cycle");
        assert!(matches!(err, ReconcileError::Cycle(path) if path == ["loop", "loop"]));
    }

    #[tokio::test]
    async fn missing_child_discards_partial_result() {
        let manager = manager_with(vec![template("a", &["b", "ghost"]), template("b", &[])]).await;
        let err = manager.gather_roles("a").await.expect_err("missing");
        assert!(matches!(err, ReconcileError::TemplateNotFound(name) if name == "ghost"));

        let err = manager.gather_roles("nobody").await.expect_err("missing root");
        assert!(matches!(err, ReconcileError::TemplateNotFound(name) if name == "nobody"));
    }
}
