//! Dependency analysis over a [`Template`].

use std::collections::{BTreeSet, HashMap};

use super::intrinsic::{is_pseudo_parameter, references};
use super::{LogicalId, Template, TemplateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Declared with `DependsOn`
    Explicit,
    /// Inferred from an intrinsic reference in the properties
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: LogicalId,
    pub to: LogicalId,
    pub kind: EdgeKind,
}

impl Template {
    /// Direct dependencies of `id`, explicit edges first.
    ///
    /// A target that is both declared in `DependsOn` and referenced is reported
    /// once, as explicit. Targets that are not declared resources are skipped;
    /// [`Template::validate`] reports those.
    pub fn dependencies(&self, id: &LogicalId) -> Vec<(LogicalId, EdgeKind)> {
        let Some(resource) = self.get(id) else {
            return Vec::new();
        };

        let mut deps: Vec<(LogicalId, EdgeKind)> = Vec::new();
        for target in &resource.depends_on {
            if self.contains(target) && !deps.iter().any(|(t, _)| t == target) {
                deps.push((target.clone(), EdgeKind::Explicit));
            }
        }
        for name in references(&resource.properties) {
            let Ok(target) = LogicalId::new(name) else {
                continue;
            };
            if self.contains(&target) && !deps.iter().any(|(t, _)| *t == target) {
                deps.push((target, EdgeKind::Reference));
            }
        }
        deps
    }

    /// Every edge in the template, grouped by source in declaration order
    pub fn edges(&self) -> Vec<Edge> {
        self.resources()
            .flat_map(|(from, _)| {
                self.dependencies(from)
                    .into_iter()
                    .map(move |(to, kind)| Edge {
                        from: from.clone(),
                        to,
                        kind,
                    })
            })
            .collect()
    }

    /// True if `from` must be created after `to`, directly or transitively
    pub fn depends_on(&self, from: &LogicalId, to: &LogicalId) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            for (dep, _) in self.dependencies(&current) {
                if dep == *to {
                    return true;
                }
                if seen.insert(dep.clone()) {
                    stack.push(dep);
                }
            }
        }
        false
    }

    /// Check that every reference resolves and that the graph is acyclic
    pub fn validate(&self) -> Result<(), TemplateError> {
        self.deployment_order().map(|_| ())
    }

    /// Resources in an order CloudFormation could create them.
    ///
    /// Deterministic: among resources whose dependencies are satisfied, the one
    /// declared first comes first.
    pub fn deployment_order(&self) -> Result<Vec<LogicalId>, TemplateError> {
        self.check_references()?;

        let ids: Vec<&LogicalId> = self.resources().map(|(id, _)| id).collect();
        let index: HashMap<&LogicalId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let deps: Vec<Vec<usize>> = ids
            .iter()
            .map(|id| {
                self.dependencies(id)
                    .iter()
                    .filter_map(|(dep, _)| index.get(dep).copied())
                    .collect()
            })
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
        for (i, targets) in deps.iter().enumerate() {
            for &t in targets {
                dependents[t].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..ids.len()).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(ids.len());

        while let Some(next) = ready.pop_first() {
            order.push(ids[next].clone());
            for &dependent in &dependents[next] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < ids.len() {
            let stuck: Vec<usize> = (0..ids.len()).filter(|&i| remaining[i] > 0).collect();
            let cycle = find_cycle(&deps, &stuck)
                .into_iter()
                .map(|i| ids[i].to_string())
                .collect();
            return Err(TemplateError::Cycle(cycle));
        }

        Ok(order)
    }

    fn check_references(&self) -> Result<(), TemplateError> {
        let dangling = |from: &str, to: &str| TemplateError::DanglingReference {
            from: from.to_string(),
            to: to.to_string(),
        };

        for (id, resource) in self.resources() {
            for target in &resource.depends_on {
                if !self.contains(target) {
                    return Err(dangling(id.as_str(), target.as_str()));
                }
            }
            for name in references(&resource.properties) {
                if !self.is_declared(&name) {
                    return Err(dangling(id.as_str(), &name));
                }
            }
        }

        for (id, output) in self.outputs() {
            for value in [Some(&output.value), output.export.as_ref()].into_iter().flatten() {
                for name in references(value) {
                    if !self.is_declared(&name) {
                        return Err(dangling(&format!("Outputs.{}", id), &name));
                    }
                }
            }
        }

        Ok(())
    }

    fn is_declared(&self, name: &str) -> bool {
        is_pseudo_parameter(name)
            || LogicalId::new(name).is_ok_and(|id| self.contains(&id))
    }
}

/// Walk dependencies from the first stuck node until one repeats.
///
/// Every stuck node has at least one stuck dependency, so the walk always
/// closes a loop.
fn find_cycle(deps: &[Vec<usize>], stuck: &[usize]) -> Vec<usize> {
    let Some(&start) = stuck.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|d| stuck.contains(d)) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::intrinsic::{get_att, reference, sub};
    use crate::template::{Output, Resource};
    use serde_json::{json, Value};

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn chain() -> Template {
        let mut template = Template::new("chain");
        let secret = template
            .add("Secret", Resource::new("AWS::SecretsManager::Secret", Value::Null))
            .unwrap();
        let rule = template
            .add(
                "Rule",
                Resource::new(
                    "AWS::ECR::PullThroughCacheRule",
                    json!({ "CredentialArn": reference(&secret) }),
                ),
            )
            .unwrap();
        let policy = template
            .add(
                "Policy",
                Resource::new(
                    "AWS::ECR::RegistryPolicy",
                    json!({ "PolicyText": sub("${AWS::AccountId}") }),
                ),
            )
            .unwrap();
        template
            .add(
                "Service",
                Resource::new("AWS::ECS::Service", json!({ "Rule": get_att(&rule, "Arn") }))
                    .depends_on(&policy),
            )
            .unwrap();
        template
    }

    #[test]
    fn test_dependencies_merge_explicit_and_reference_edges() {
        let template = chain();

        assert_eq!(
            template.dependencies(&id("Service")),
            vec![
                (id("Policy"), EdgeKind::Explicit),
                (id("Rule"), EdgeKind::Reference)
            ]
        );
        assert_eq!(
            template.dependencies(&id("Rule")),
            vec![(id("Secret"), EdgeKind::Reference)]
        );
        assert!(template.dependencies(&id("Policy")).is_empty());
    }

    #[test]
    fn test_explicit_wins_over_reference() {
        let mut template = Template::new("t");
        let a = template
            .add("A", Resource::new("AWS::SNS::Topic", Value::Null))
            .unwrap();
        template
            .add(
                "B",
                Resource::new("AWS::SNS::Topic", json!({ "X": reference(&a) })).depends_on(&a),
            )
            .unwrap();

        assert_eq!(
            template.dependencies(&id("B")),
            vec![(id("A"), EdgeKind::Explicit)]
        );
        assert_eq!(template.edges().len(), 1);
    }

    #[test]
    fn test_transitive_dependency() {
        let template = chain();

        assert!(template.depends_on(&id("Service"), &id("Secret")));
        assert!(template.depends_on(&id("Service"), &id("Policy")));
        assert!(!template.depends_on(&id("Secret"), &id("Service")));
        assert!(!template.depends_on(&id("Policy"), &id("Rule")));
    }

    #[test]
    fn test_deployment_order_respects_edges_and_declaration_order() {
        let template = chain();

        let order = template.deployment_order().unwrap();

        assert_eq!(order, vec![id("Secret"), id("Rule"), id("Policy"), id("Service")]);
    }

    #[test]
    fn test_deployment_order_moves_dependencies_forward() {
        let mut template = Template::new("t");
        let late = LogicalId::new("Late").unwrap();
        template
            .add(
                "Early",
                Resource::new("AWS::SNS::Topic", json!({ "X": reference(&late) })),
            )
            .unwrap();
        template
            .add("Late", Resource::new("AWS::SNS::Topic", Value::Null))
            .unwrap();

        assert_eq!(
            template.deployment_order().unwrap(),
            vec![id("Late"), id("Early")]
        );
    }

    #[test]
    fn test_dangling_depends_on() {
        let mut template = Template::new("t");
        template
            .add(
                "Service",
                Resource::new("AWS::ECS::Service", Value::Null).depends_on(&id("Ghost")),
            )
            .unwrap();

        assert_eq!(
            template.validate(),
            Err(TemplateError::DanglingReference {
                from: "Service".to_string(),
                to: "Ghost".to_string()
            })
        );
    }

    #[test]
    fn test_dangling_output_reference() {
        let mut template = chain();
        template
            .add_output("Dns", Output::new(get_att(&id("Lb"), "DNSName")))
            .unwrap();

        assert_eq!(
            template.validate(),
            Err(TemplateError::DanglingReference {
                from: "Outputs.Dns".to_string(),
                to: "Lb".to_string()
            })
        );
    }

    #[test]
    fn test_pseudo_parameters_are_not_dangling() {
        let mut template = Template::new("t");
        template
            .add(
                "Topic",
                Resource::new(
                    "AWS::SNS::Topic",
                    json!({ "Name": sub("${AWS::StackName}-${AWS::Region}") }),
                ),
            )
            .unwrap();

        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let mut template = Template::new("t");
        template
            .add("Lone", Resource::new("AWS::SNS::Topic", Value::Null))
            .unwrap();
        template
            .add(
                "A",
                Resource::new("AWS::SNS::Topic", json!({ "X": reference("B") })),
            )
            .unwrap();
        template
            .add(
                "B",
                Resource::new("AWS::SNS::Topic", Value::Null).depends_on(&id("A")),
            )
            .unwrap();

        assert_eq!(
            template.deployment_order(),
            Err(TemplateError::Cycle(vec![
                "A".to_string(),
                "B".to_string(),
                "A".to_string()
            ]))
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut template = Template::new("t");
        template
            .add(
                "Loop",
                Resource::new("AWS::SNS::Topic", json!({ "X": reference("Loop") })),
            )
            .unwrap();

        assert_eq!(
            template.validate(),
            Err(TemplateError::Cycle(vec![
                "Loop".to_string(),
                "Loop".to_string()
            ]))
        );
    }
}
