use casbin::prelude::DefaultModel;

// Objects are matched exactly; hierarchy is resolved before enforcement.
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
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act
"#;

pub fn casbin_model_string() -> &'static str {
    MODEL
}

pub async fn casbin_model() -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(MODEL).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use casbin::Model;

    #[test]
    fn model_string_matches_objects_exactly() {
        let model = casbin_model_string();
        assert!(model.contains("r.obj == p.obj"));
        assert!(model.contains("request_definition"));
    }

    #[tokio::test]
    async fn model_builds() {
        let model = casbin_model().await.expect("model");
        let data = model.get_model();
        assert!(data.contains_key("r"));
        assert!(data.contains_key("p"));
        assert!(data.contains_key("g"));
    }
}
