use fabric::{Block, ContentBlock, DataBlock};

/// Copy fields from `target` into a ref block: attributes only where the
/// ref block has none of that name, the type always, meta only if absent.
fn merge_block(block: &mut Block, target: &Block) {
    for (name, attr) in &target.attrs {
        if !block.attrs.contains_key(name) {
            block.attrs.insert(name.clone(), attr.clone());
        }
    }
    block.block_type = target.block_type.clone();
    if block.meta.is_none() {
        block.meta = target.meta.clone();
    }
}

/// Query and title are copied only if absent. Children are inherited only
/// when the ref block declares none of its own.
pub fn merge_content(content: &mut ContentBlock, target: &ContentBlock) {
    merge_block(&mut content.block, &target.block);
    if content.query.is_none() {
        content.query = target.query.clone();
    }
    if content.title.is_none() {
        content.title = target.title.clone();
    }
    if content.children.is_empty() {
        content.children = target.children.clone();
    }
}

pub fn merge_data(data: &mut DataBlock, target: &DataBlock) {
    merge_block(&mut data.block, &target.block);
}

#[cfg(test)]
mod tests {
    use fabric::expression::Expression;
    use fabric::{Attribute, Meta};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn attr(name: &str, value: serde_json::Value) -> (String, Attribute) {
        (name.to_string(), Attribute::new(name, Expression::Literal(value)))
    }

    #[test]
    fn own_attributes_win() {
        let mut data = DataBlock::new("ref", "copy");
        data.block.attrs.extend([attr("a", json!(1))]);
        let mut target = DataBlock::new("inline", "original");
        target.block.attrs.extend([attr("a", json!(2)), attr("b", json!(3))]);
        target.block.meta = Some(Meta {
            name: Some("Original".to_string()),
            ..Meta::default()
        });

        merge_data(&mut data, &target);

        assert_eq!(data.block.block_type, "inline");
        assert_eq!(data.block.name, "copy");
        assert_eq!(data.block.attrs.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(data.block.attrs["a"].expr, Expression::Literal(json!(1)));
        assert_eq!(data.block.meta, target.block.meta);
    }

    #[test]
    fn own_query_title_and_children_are_kept() {
        let mut content = ContentBlock::new("ref", "copy");
        content.title = Some("Mine".to_string());
        content.children.push(ContentBlock::new("text", "own-child"));
        let mut target = ContentBlock::new("text", "original");
        target.title = Some("Theirs".to_string());
        target.query = Some(".data".to_string());
        target.children.push(ContentBlock::new("text", "target-child"));

        merge_content(&mut content, &target);

        assert_eq!(content.title.as_deref(), Some("Mine"));
        assert_eq!(content.query.as_deref(), Some(".data"));
        assert_eq!(content.children.len(), 1);
        assert_eq!(content.children[0].block.name, "own-child");
    }

    #[test]
    fn children_are_inherited_when_none_declared() {
        let mut content = ContentBlock::new("ref", "copy");
        let mut target = ContentBlock::new("group", "original");
        target.children.push(ContentBlock::new("text", "a"));
        target.children.push(ContentBlock::new("text", "b"));

        merge_content(&mut content, &target);

        let names: Vec<_> = content.children.iter().map(|c| c.block.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
