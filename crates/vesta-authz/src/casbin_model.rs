use crate::AuthzResult;
use casbin::prelude::DefaultModel;

// Domain = namespace (or the cluster pseudo-domain); keyMatch lets `*` in a
// rule's resources or verbs match any request value.
const MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && keyMatch(r.obj, p.obj) && keyMatch(r.act, p.act)
"#;

pub fn casbin_model_string() -> &'static str {
    MODEL
}

pub async fn casbin_model() -> AuthzResult<DefaultModel> {
    Ok(DefaultModel::from_str(MODEL).await?)
}
