//! Relative address extraction.

use std::collections::BTreeSet;

use alloy_primitives::Address;

use crate::config::ContractOverrides;
use crate::handlers::HandlerResult;
use crate::types::AddressesWithTemplates;

/// Collects the addresses a contract points at, each tagged with the templates
/// its referring fields suggest.
///
/// Sources are the address-typed values in `results` (searched recursively),
/// `proxy_relatives` and `implementations`. Skipped are results flagged
/// `ignore_relative`, fields named in `ignore_relatives`, addresses listed in
/// `ignore_relatives`, and the zero address.
pub fn get_relatives_with_suggested_templates(
    results: &[HandlerResult],
    overrides: Option<&ContractOverrides>,
    proxy_relatives: &[Address],
    implementations: &[Address],
) -> AddressesWithTemplates {
    let ignored_fields: BTreeSet<&str> = overrides
        .map(|o| o.ignore_relatives.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let mut relatives = AddressesWithTemplates::new();

    for result in results {
        if result.ignore_relative || ignored_fields.contains(result.field.as_str()) {
            continue;
        }
        let Some(value) = &result.value else {
            continue;
        };
        let suggested = overrides.and_then(|o| o.suggested_template(&result.field));

        for address in value.addresses() {
            let templates = relatives.entry(address).or_default();
            if let Some(template) = suggested {
                templates.insert(template.to_string());
            }
        }
    }

    for address in proxy_relatives.iter().chain(implementations) {
        relatives.entry(*address).or_default();
    }

    if let Some(overrides) = overrides {
        for address in overrides.ignored_relative_addresses() {
            relatives.remove(&address);
        }
    }
    relatives.remove(&Address::ZERO);

    relatives
}
