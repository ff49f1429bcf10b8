//! Everything in exactly one SIP.

use super::{Frame, Strategy};
use crate::sip::SipKind;

pub(super) fn post_directory(strategy: &mut Strategy, frame: Frame) {
    strategy.attach(frame.node);
}

/// A lone directory root contributes its contents; several roots are kept
/// as they are. The SIP is created even when every path was filtered.
pub(super) fn end(strategy: &mut Strategy) {
    let roots = std::mem::take(&mut strategy.roots);
    let name = roots.first().map(|root| root.name()).unwrap_or_else(|| "sip".to_string());
    match <[_; 1]>::try_from(roots) {
        Ok([root]) if root.is_dir() => {
            let source = root.path().to_path_buf();
            strategy.create(name, SipKind::Sip, root.into_children(), Some(source), None);
        },
        Ok([root]) => {
            strategy.create_from_file(root, None);
        },
        Err(roots) => {
            strategy.create(name, SipKind::Sip, roots, None, None);
        },
    }
}
