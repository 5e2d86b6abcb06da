//! Hierarchy iterator (C7): depth-first traversal of the nets → vms → images
//! chain, yielding per-object parameter views.

use crate::error::{Error, Result};
use crate::params::Params;
use tracing::warn;

/// One yielded view: the scoped parameters for a single object, plus its
/// identity in the hierarchy.
#[derive(Clone, Debug)]
pub struct ObjectView {
    /// `/`-joined name path, e.g. `net1/vm1/image1`.
    pub object_name: String,
    /// `/`-joined type path, e.g. `nets/vms/images`.
    pub object_type: String,
    /// Parameters scoped to `object_name`.
    pub params: Params,
}

/// Walks `params`'s configured `states_chain` depth-first and returns every
/// yielded [`ObjectView`], applying `skip_types` and the `image_readonly`
/// exception along the way.
pub fn iterate(params: &Params) -> Result<Vec<ObjectView>> {
    let chain = params.objects("states_chain");
    if chain.is_empty() {
        return Err(Error::NoStatesChain {});
    }
    let mut out = Vec::new();
    walk(params, &chain, &mut Vec::new(), &mut out);
    Ok(out)
}

fn walk(
    params: &Params,
    chain: &[String],
    composites: &mut Vec<(String, String)>,
    out: &mut Vec<ObjectView>,
) {
    let obj_type = &chain[composites.len()];
    let object_path_so_far = composites
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join("/");
    let names = params.objects_scoped(obj_type, &object_path_so_far);

    for name in names {
        composites.push((name.clone(), obj_type.clone()));
        let object_name = composites
            .iter()
            .map(|(n, _)| n.as_str())
            .collect::<Vec<_>>()
            .join("/");
        let object_type = composites
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join("/");

        let mut overrides: Vec<(String, String)> = composites
            .iter()
            .map(|(n, t)| (t.clone(), n.clone()))
            .collect();
        overrides.push(("object_name".to_string(), object_name.clone()));
        overrides.push(("object_type".to_string(), object_type.clone()));
        let view_params = params.with_overrides(overrides);

        if obj_type.as_str() != chain.last().map(String::as_str).unwrap_or_default() {
            walk(&view_params, chain, composites, out);
        }

        if should_skip(&view_params, &object_type, &object_name) {
            composites.pop();
            continue;
        }

        out.push(ObjectView {
            object_name,
            object_type,
            params: view_params,
        });
        composites.pop();
    }
}

fn should_skip(params: &Params, object_type: &str, object_name: &str) -> bool {
    let skip_types = params.objects("skip_types");
    if skip_types.iter().any(|t| t == object_type) {
        return true;
    }
    if object_type == "nets/vms/images" && params.get_bool("image_readonly", object_name, false) {
        warn!(
            object = object_name,
            "cannot use any state from readonly image - skipping"
        );
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_params() -> Params {
        let mut data = HashMap::new();
        data.insert("states_chain".to_string(), "nets vms images".to_string());
        data.insert("nets".to_string(), "net1".to_string());
        data.insert("vms_net1".to_string(), "vm1".to_string());
        data.insert("images_net1_vm1".to_string(), "image1 image2".to_string());
        Params::new(data)
    }

    #[test]
    fn yields_leaves_before_composites() {
        let views = iterate(&base_params()).unwrap();
        let names: Vec<&str> = views.iter().map(|v| v.object_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "net1/vm1/image1",
                "net1/vm1/image2",
                "net1/vm1",
                "net1",
            ]
        );
    }

    #[test]
    fn honours_skip_types() {
        let params = base_params().with_override("skip_types", "nets/vms/images");
        let views = iterate(&params).unwrap();
        assert!(views.iter().all(|v| v.object_type != "nets/vms/images"));
    }

    #[test]
    fn honours_image_readonly() {
        let params = base_params().with_override("image_readonly_net1_vm1_image1", "yes");
        let views = iterate(&params).unwrap();
        assert!(!views.iter().any(|v| v.object_name == "net1/vm1/image1"));
        assert!(views.iter().any(|v| v.object_name == "net1/vm1/image2"));
    }

    #[test]
    fn missing_chain_is_invalid() {
        let params = Params::default();
        assert!(matches!(iterate(&params), Err(Error::NoStatesChain {})));
    }
}
