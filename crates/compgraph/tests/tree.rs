mod common;

use compgraph::component::SCOPE_SEPARATOR;
use compgraph::{Assembly, ComponentTree, GraphError, Tensor};

use common::{Doubler, Pipeline, Root};

fn snapshot(tree: &ComponentTree) -> Vec<(String, Vec<String>)> {
    tree.walk()
        .into_iter()
        .map(|id| {
            let children = tree.children(id).map(|(name, _)| name.to_string()).collect();
            (tree.scope(id).unwrap_or_default().to_string(), children)
        })
        .collect()
}

#[test]
fn name_conflict_leaves_structure_unchanged() -> anyhow::Result<()> {
    let mut tree = common::pipeline_tree();
    let before = snapshot(&tree);
    let node_count = tree.len();

    let stray = tree.insert(Assembly::new("stray", Doubler::new()))?;
    let err = tree.attach(tree.root(), stray, "first").unwrap_err();
    assert!(matches!(err, GraphError::NameConflict { ref name, .. } if name == "first"));

    let err = tree
        .attach_assembly(tree.root(), Assembly::new("second", Doubler::new()))
        .unwrap_err();
    assert!(matches!(err, GraphError::NameConflict { .. }));

    assert_eq!(snapshot(&tree), before);
    assert_eq!(tree.len(), node_count + 1, "only the explicit insert added a node");
    assert_eq!(tree.parent(stray), None);
    Ok(())
}

#[test]
fn duplicate_names_inside_an_assembly_are_rejected_up_front() {
    let assembly = Assembly::new("outer", Root::new())
        .with_child(Assembly::new("same", Doubler::new()))
        .with_child(Assembly::new("same", Doubler::new()));
    let mut tree = common::pipeline_tree();
    let count = tree.len();
    let err = tree.attach_assembly(tree.root(), assembly).unwrap_err();
    assert!(matches!(err, GraphError::NameConflict { .. }));
    assert_eq!(tree.len(), count);
}

#[test]
fn scope_is_parent_scope_plus_local_name() -> anyhow::Result<()> {
    let mut tree = common::pipeline_tree();
    let first = tree.child(tree.root(), "first").expect("first child");
    let nested = tree.attach_assembly(first, Pipeline::assembly("inner"))?;

    assert_eq!(tree.scope(tree.root()), Some("pipe"));
    for id in tree.walk() {
        let Some(parent) = tree.parent(id) else {
            assert_eq!(tree.scope(id), tree.name(id));
            continue;
        };
        let expected = format!(
            "{}{SCOPE_SEPARATOR}{}",
            tree.scope(parent).unwrap(),
            tree.name(id).unwrap()
        );
        assert_eq!(tree.scope(id), Some(expected.as_str()));
    }
    assert_eq!(tree.scope(nested), Some("pipe/first/inner"));
    assert_eq!(tree.find("pipe/first/inner/second"), tree.child(nested, "second"));
    assert_eq!(tree.find("other/first"), None);
    Ok(())
}

#[test]
fn unattached_subtrees_have_no_scope_until_attached() -> anyhow::Result<()> {
    let mut tree = ComponentTree::new(Assembly::new("root", Root::new()))?;
    let sub = tree.insert(Pipeline::assembly("sub"))?;
    let first = tree.child(sub, "first").expect("assembly children are attached to their owner");
    assert_eq!(tree.scope(sub), None);
    assert_eq!(tree.scope(first), None);

    tree.attach(tree.root(), sub, "renamed")?;
    assert_eq!(tree.scope(first), Some("root/renamed/first"));
    assert_eq!(tree.walk().len(), 4);
    Ok(())
}

#[test]
fn invalid_names_are_rejected() {
    for name in ["", "a/b", "caf\u{e9}"] {
        let err = ComponentTree::new(Assembly::new(name, Root::new())).unwrap_err();
        assert!(matches!(err, GraphError::InvalidName { .. }), "{name:?}: {err}");
    }
}

#[test]
fn subtree_cannot_be_attached_below_itself() -> anyhow::Result<()> {
    let mut tree = ComponentTree::new(Assembly::new("root", Root::new()))?;
    let sub = tree.insert(Pipeline::assembly("sub"))?;
    let first = tree.child(sub, "first").expect("first");
    let err = tree.attach(first, sub, "loop").unwrap_err();
    assert!(matches!(err, GraphError::AlreadyAttached { .. }));
    Ok(())
}

#[test]
fn tree_is_frozen_once_built() -> anyhow::Result<()> {
    let mut graph = common::immediate(common::pipeline_tree());
    let root = graph.tree().root();
    graph.call_tensors(root, "add", vec![Tensor::scalar(1.0)])?;

    let err = graph
        .tree_mut()
        .attach_assembly(root, Assembly::new("late", Doubler::new()))
        .unwrap_err();
    assert!(matches!(err, GraphError::TreeFrozen));
    Ok(())
}
