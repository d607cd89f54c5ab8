//! Depth-first recursive traversal.

use portage_core::ExportInformation;

use super::CopyRun;

pub(super) fn run(copy: &mut CopyRun<'_>, start: ExportInformation) {
    visit(copy, start);
}

fn visit(copy: &mut CopyRun<'_>, info: ExportInformation) {
    let Some(continuation) = copy.step(&info) else {
        return;
    };

    // The rest of this container first: children may reference parents
    // created by later pages.
    if let Some(token) = continuation.next_pagination() {
        visit(
            copy,
            ExportInformation::next_page(token.clone(), info.resource.clone()),
        );
    }
    for resource in continuation.sub_resources() {
        visit(copy, ExportInformation::container(resource.clone()));
    }
}
