//! The `template` operator: renders one manifest template against the
//! merged vars/facts/secrets data bundle, writing the result to one or
//! more destinations.

use crate::operator::{DesiredState, OpContext, OpError, Operator};
use crate::snapshot::{sha256_bytes, snapshot};
use polyester_core::{FileSnapshot, State, StateEntry};
use polyester_fs::AssetKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateOpts {
    pub path: String,
    pub dests: Vec<String>,
    #[serde(default)]
    pub data_paths: Vec<String>,
}

pub struct Template(pub TemplateOpts);

impl Template {
    fn build_data(&self, ctx: &OpContext) -> Result<polyester_template::DataBundle, OpError> {
        let mut data = polyester_template::DataBundle::new();
        for data_path in &self.0.data_paths {
            for rel in ctx.plandir.resolve(AssetKind::Vars, data_path)? {
                let abs = ctx.plandir.join(&["vars", &rel.to_string_lossy()]);
                let yaml = std::fs::read_to_string(&abs)?;
                data = data.with_vars_yaml(&yaml)?;
            }
        }
        // Every secret under the active plan dir (or manifest root) is
        // decoded and exposed as `secrets.<name>`, name taken relative to
        // `secrets/` with any `.age` extension stripped.
        if let Ok(matches) = ctx.plandir.resolve(AssetKind::Secrets, "**/*") {
            for rel in matches {
                let abs = ctx.plandir.join(&["secrets", &rel.to_string_lossy()]);
                let ciphertext = std::fs::read(&abs)?;
                let name = rel.to_string_lossy().trim_end_matches(".age").to_string();
                data = data.with_secret(ctx.secrets.as_ref(), &name, &ciphertext)?;
            }
        }
        Ok(data)
    }

    /// Resolves the template's source path and renders it against the
    /// current data bundle, without touching any destination. Shared by
    /// `run` (which then writes the result) and `desired_state` (which
    /// only needs the rendered bytes to hash).
    fn render(&self, ctx: &OpContext) -> Result<(std::path::PathBuf, String), OpError> {
        let matches = ctx.plandir.resolve(AssetKind::Templates, &self.0.path)?;
        let rel = matches
            .first()
            .ok_or_else(|| OpError::User(format!("template: no template matched {:?}", self.0.path)))?
            .clone();
        let abs = ctx.plandir.join(&["templates", &rel.to_string_lossy()]);
        let source = std::fs::read_to_string(&abs)?;
        let data = self.build_data(ctx)?;
        let rendered = ctx.template.render_str(&source, &data)?;
        Ok((rel, rendered))
    }
}

impl Operator for Template {
    fn name(&self) -> &'static str {
        "template"
    }

    fn get_state(&self, ctx: &OpContext) -> Result<State, OpError> {
        let mut state = State::new();
        if let Ok(matches) = ctx.plandir.resolve(AssetKind::Templates, &self.0.path) {
            for rel in matches {
                let abs = ctx.plandir.join(&["templates", &rel.to_string_lossy()]);
                if let Some(snap) = snapshot(&abs)? {
                    state = state.append([StateEntry::source(format!("src:{}", rel.display()), snap)]);
                }
            }
        }
        for dest in &self.0.dests {
            let abs = ctx.host.abs(dest);
            if let Some(snap) = snapshot(&abs)? {
                state = state.append([StateEntry::target(dest.clone(), snap)]);
            }
        }
        Ok(state)
    }

    fn run(&self, ctx: &OpContext) -> Result<State, OpError> {
        let (_, rendered) = self.render(ctx)?;

        for dest in &self.0.dests {
            let dest_abs = ctx.host.abs(dest);
            if let Some(parent) = dest_abs.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest_abs, &rendered)?;
        }

        self.get_state(ctx)
    }

    fn as_desired_state(&self) -> Option<&dyn DesiredState> {
        Some(self)
    }
}

impl DesiredState for Template {
    /// Renders the template in-memory and hashes the result per
    /// destination, without writing anything to disk — lets the executor
    /// decide dirtiness from the render outcome instead of from
    /// post-`run` `get_state`, which would require performing the write
    /// first to observe it.
    fn desired_state(&self, ctx: &OpContext) -> Result<State, OpError> {
        let (rel, rendered) = self.render(ctx)?;
        let hash = sha256_bytes(rendered.as_bytes());

        let mut state = State::new();
        let abs = ctx.plandir.join(&["templates", &rel.to_string_lossy()]);
        if let Some(snap) = snapshot(&abs)? {
            state = state.append([StateEntry::source(format!("src:{}", rel.display()), snap)]);
        }
        for dest in &self.0.dests {
            let snap = FileSnapshot {
                name: Some(dest.clone()),
                sha256: Some(hash.clone()),
                ..FileSnapshot::default()
            };
            state = state.append([StateEntry::target(dest.clone(), snap)]);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OpContext;
    use tempfile::tempdir;

    fn test_ctx(vars_yaml: &str) -> (OpContext, tempfile::TempDir, tempfile::TempDir) {
        let host = tempdir().unwrap();
        let plandir = tempdir().unwrap();
        std::fs::create_dir_all(plandir.path().join("templates")).unwrap();
        std::fs::write(plandir.path().join("templates").join("hi.tmpl"), "hi {{vars.name}}").unwrap();
        std::fs::create_dir_all(plandir.path().join("vars")).unwrap();
        std::fs::write(plandir.path().join("vars").join("default.yaml"), vars_yaml).unwrap();
        let ctx = OpContext::new(host.path(), plandir.path());
        (ctx, host, plandir)
    }

    fn op() -> Template {
        Template(TemplateOpts {
            path: "hi.tmpl".into(),
            dests: vec!["out".into()],
            data_paths: vec!["default.yaml".into()],
        })
    }

    #[test]
    fn desired_state_matches_run_without_writing() {
        let (ctx, host, _plandir) = test_ctx("name: world\n");
        let op = op();

        let desired = op.desired_state(&ctx).unwrap();
        assert!(!host.path().join("out").exists());

        op.run(&ctx).unwrap();
        let after = op.get_state(&ctx).unwrap();

        assert_eq!(desired.target().entries[0].file.as_ref().unwrap().sha256, after.target().entries[0].file.as_ref().unwrap().sha256);
    }

    #[test]
    fn desired_state_changes_when_vars_change() {
        let (ctx, _host, plandir) = test_ctx("name: world\n");
        let op = op();
        let before = op.desired_state(&ctx).unwrap();

        std::fs::write(plandir.path().join("vars").join("default.yaml"), "name: there\n").unwrap();
        let after = op.desired_state(&ctx).unwrap();

        assert!(before.target().changed(&after.target()));
    }

    #[test]
    fn as_desired_state_returns_self() {
        let op = op();
        assert!((&op as &dyn Operator).as_desired_state().is_some());
    }
}
