//! Iterative traversal over an explicit LIFO work stack.
//!
//! Visits in the same order as the recursive variant while keeping call
//! depth constant, so very deep or wide trees are fine.

use portage_core::ExportInformation;

use super::CopyRun;

pub(super) fn run(copy: &mut CopyRun<'_>, start: ExportInformation) {
    let mut pending = vec![start];

    while let Some(info) = pending.pop() {
        let Some(continuation) = copy.step(&info) else {
            continue;
        };

        // Pushed in reverse: the next page pops first, then sub-resources in
        // their listed order.
        for resource in continuation.sub_resources().iter().rev() {
            pending.push(ExportInformation::container(resource.clone()));
        }
        if let Some(token) = continuation.next_pagination() {
            pending.push(ExportInformation::next_page(token.clone(), info.resource));
        }
    }
}
