//! Partner group policy: user attributes → target group name.

use signet_model::Attributes;

pub const GROUP_PAYMENT_INSTITUTIONS: &str = "payware-partners-payment-institutions";
pub const GROUP_MERCHANTS: &str = "payware-partners-merchants";
pub const GROUP_ISVS: &str = "payware-partners-isvs";

/// Resolve the partner group for a user's attributes.
///
/// - `tenant_type` absent or unrecognized → None
/// - `BANK` → payment institutions
/// - `MERCHANT` → ISVs when `isISV` is true (absent means false), merchants
///   otherwise
pub fn resolve_partner_group(attributes: &Attributes) -> Option<&'static str> {
    match attributes.get_str("tenant_type")? {
        "BANK" => Some(GROUP_PAYMENT_INSTITUTIONS),
        "MERCHANT" => {
            if attributes.get_bool("isISV", false) {
                Some(GROUP_ISVS)
            } else {
                Some(GROUP_MERCHANTS)
            }
        }
        _ => None,
    }
}
