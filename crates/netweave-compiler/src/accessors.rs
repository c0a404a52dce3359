//! Which user-written accessor bodies the weaver may replace.
//!
//! Generated accessors overwrite whatever the user wrote, so only bodies
//! that carry no logic are accepted. Anything else is a validation error
//! rather than a silent discard.

use netweave_types::body::{Expr, Literal, Place, Stmt};
use netweave_types::ir::PropertyDef;
use netweave_types::{ErrorCode, Subject, WeaveError, WeaveResult};

/// Reject a networked property whose getter or setter does real work.
pub fn check_replaceable(prop: &PropertyDef, subject: &Subject) -> WeaveResult<()> {
    let backing = prop.backing_field.as_deref();
    if let Some(getter) = &prop.getter {
        if !is_trivial_getter(getter, backing) {
            return Err(non_trivial(subject, "getter", getter.len()));
        }
    }
    if let Some(setter) = &prop.setter {
        if !is_trivial_setter(setter, backing) {
            return Err(non_trivial(subject, "setter", setter.len()));
        }
    }
    Ok(())
}

/// `{}`, `return default;` or `return this.<backing>;`
pub fn is_trivial_getter(body: &[Stmt], backing: Option<&str>) -> bool {
    match body {
        [] => true,
        [Stmt::Return {
            value: Some(Expr::Lit {
                value: Literal::Default,
            }),
        }] => true,
        [Stmt::Return {
            value: Some(Expr::Field { target, name }),
        }] => matches!(**target, Expr::This) && Some(name.as_str()) == backing,
        _ => false,
    }
}

/// `{}`, `return;` or `this.<backing> = value;`
pub fn is_trivial_setter(body: &[Stmt], backing: Option<&str>) -> bool {
    match body {
        [] | [Stmt::Return { value: None }] => true,
        [Stmt::Assign {
            place: Place::Field { target, name },
            value: Expr::Local { name: value },
        }] => matches!(target, Expr::This) && Some(name.as_str()) == backing && value == "value",
        _ => false,
    }
}

fn non_trivial(subject: &Subject, accessor: &str, statements: usize) -> WeaveError {
    WeaveError::validation(
        ErrorCode::NON_TRIVIAL_ACCESSOR,
        subject.clone(),
        format!(
            "{accessor} has a hand-written body ({statements} statement(s)) that weaving would discard"
        ),
    )
    .with_suggestion("use an auto-property and move the logic into a separate method")
}

#[cfg(test)]
mod tests {
    use super::*;
    use netweave_types::body::BinaryOp;
    use netweave_types::ir::{ScalarKind, TypeRef};

    fn subject() -> Subject {
        Subject::member("Player", "Health")
    }

    #[test]
    fn test_auto_property_is_replaceable() {
        let prop = PropertyDef::networked("Health", TypeRef::Scalar(ScalarKind::I32));
        assert!(check_replaceable(&prop, &subject()).is_ok());
    }

    #[test]
    fn test_empty_and_default_bodies_are_replaceable() {
        let prop = PropertyDef::bare("Health", TypeRef::Scalar(ScalarKind::I32))
            .with_getter(vec![Stmt::ret(Expr::default_value())])
            .with_setter(vec![Stmt::ret_void()]);
        assert!(check_replaceable(&prop, &subject()).is_ok());
        let prop = PropertyDef::bare("Health", TypeRef::Scalar(ScalarKind::I32))
            .with_getter(Vec::new());
        assert!(check_replaceable(&prop, &subject()).is_ok());
    }

    #[test]
    fn test_getter_with_logic_is_rejected() {
        let prop = PropertyDef::networked("Health", TypeRef::Scalar(ScalarKind::I32)).with_getter(
            vec![Stmt::ret(Expr::binary(
                BinaryOp::Add,
                Expr::this_field("<Health>k__BackingField"),
                Expr::int(1),
            ))],
        );
        let err = check_replaceable(&prop, &subject()).unwrap_err();
        assert_eq!(err.code, ErrorCode::NON_TRIVIAL_ACCESSOR);
        assert!(err.message.contains("getter"));
    }

    #[test]
    fn test_setter_writing_another_field_is_rejected() {
        let prop = PropertyDef::networked("Health", TypeRef::Scalar(ScalarKind::I32))
            .with_setter(vec![Stmt::assign(Place::this_field("other"), Expr::local("value"))]);
        let err = check_replaceable(&prop, &subject()).unwrap_err();
        assert!(err.message.contains("setter"));
    }
}
