//! E4: unsetting the LVM pointer state by name is rejected before any LVM
//! command is ever shelled out to.

#[macro_use]
extern crate assert_matches;

use std::collections::HashMap;
use vmstate_core::backend::lvm::LvmBackend;
use vmstate_core::backend::StateBackend;
use vmstate_core::error::Error;
use vmstate_core::params::Params;

#[tokio::test]
async fn unsetting_the_pointer_state_is_rejected() {
    let mut data = HashMap::new();
    data.insert("lv_pointer_name".to_string(), "current_state".to_string());
    data.insert("unset_state".to_string(), "current_state".to_string());
    let params = Params::new(data);

    let backend = LvmBackend::new();
    let err = backend
        .unset(&params, "vm1/image1", None)
        .await
        .unwrap_err();
    assert_matches!(err, Error::InvalidPointerUnset { .. });
}
