use serde_json as json;

// Rewrites a JSON value so that every object's keys appear in sorted order; array
// order is preserved because field order in rendered specs is significant.
pub fn order_json(value: &json::Value) -> json::Value {
    match value {
        json::Value::Array(a) => json::Value::Array(a.iter().map(order_json).collect()),
        json::Value::Object(o) => {
            let mut pairs: Vec<_> = o.iter().map(|(k, v)| (k.clone(), order_json(v))).collect();
            pairs.sort_by(|(k1, _), (k2, _)| std::cmp::Ord::cmp(k1, k2));

            json::Value::Object(pairs.into_iter().collect())
        },
        _ => value.clone(),
    }
}

// Canonical string form of a value; identical across replicas for inputs that are
// structurally equal, whatever order their maps were built in.
pub fn canonical_string(value: &json::Value) -> String {
    order_json(value).to_string()
}

pub fn ordered_eq(v1: &json::Value, v2: &json::Value) -> bool {
    order_json(v1) == order_json(v2)
}
