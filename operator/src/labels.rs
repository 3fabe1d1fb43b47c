use std::collections::BTreeMap;

/// Create labels that can be used as a unique selector for a given service name.
pub fn selector_labels(service: &str) -> BTreeMap<String, String> {
    BTreeMap::from_iter(vec![("service".to_owned(), service.to_owned())])
}

/// Manage by label
pub const MANAGED_BY_LABEL_SELECTOR: &str = "managed-by=ovn-operator";

/// Labels that indicate the resource is managed by the ovn operator.
pub fn managed_labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from_iter(vec![(
        "managed-by".to_owned(),
        "ovn-operator".to_owned(),
    )]))
}

/// Managed labels merged with any extra labels.
pub fn managed_labels_extend(
    labels: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    managed_labels().map(|mut managed| {
        managed.extend(labels.unwrap_or_default());
        managed
    })
}
