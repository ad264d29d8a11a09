use super::assignment::{AssignmentBuilder, AssignmentError, MemberEndpoint};
use super::catalog::StoreCatalog;

/// Deterministic placement computed identically on every node.
///
/// Members are ordered by node id and partition `p` of every store goes to
/// member `p % n`. Equal partition ids of different stores therefore land on
/// the same node, so co-partitioned stores stay together.
pub fn round_robin(
    catalog: &StoreCatalog,
    members: &[MemberEndpoint],
) -> Result<AssignmentBuilder, AssignmentError> {
    if members.is_empty() {
        return Err(AssignmentError::NoMembers);
    }

    let mut sorted: Vec<MemberEndpoint> = members.to_vec();
    sorted.sort_by(|a, b| a.id.0.cmp(&b.id.0));
    sorted.dedup_by(|a, b| a.id == b.id);

    let mut builder = AssignmentBuilder::new();
    for member in &sorted {
        builder.add_node(member.clone())?;
    }

    for spec in catalog.specs() {
        builder.add_store(spec.clone());
        for partition in 0..spec.partitions {
            let owner = &sorted[partition as usize % sorted.len()];
            builder.assign(&spec.name, partition, &owner.id)?;
        }
    }

    Ok(builder)
}
