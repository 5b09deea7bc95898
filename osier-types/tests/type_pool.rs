//! Tests for the type pool: structural interning laws and the composite
//! builder, following the shape of the original pool test suite.

use osier_pool::IdentifierId;
use osier_syntax::AstNodeId;
use osier_types::{
    ArrayType, FloatType, IntegerType, Member, TypePool, TypeTag,
};

fn dummy_pool() -> TypePool {
    TypePool::with_capacity(1 << 12, 1 << 4, 1 << 16, 1 << 8)
}

#[test]
fn primitive_type_with_integer_returns_integer_type() {
    let mut types = dummy_pool();

    let u16_type = IntegerType {
        bits: 16,
        is_signed: false,
    };

    let id = types.simple_type(TypeTag::Integer, &u16_type.to_bytes());

    assert!(!id.is_invalid());
    assert_eq!(types.type_tag_from_id(id), TypeTag::Integer);

    let decoded = IntegerType::from_bytes(types.primitive_type_structure(id));

    assert_eq!(decoded.bits, 16);
    assert!(!decoded.is_signed);
}

#[test]
fn primitive_type_with_integer_twice_returns_same_type_twice() {
    let mut types = dummy_pool();

    let s32 = IntegerType {
        bits: 32,
        is_signed: true,
    };

    let a = types.simple_type(TypeTag::Integer, &s32.to_bytes());
    let b = types.simple_type(TypeTag::Integer, &s32.to_bytes());

    assert_eq!(a, b);
    assert_eq!(types.len(), 1);

    let decoded = IntegerType::from_bytes(types.primitive_type_structure(a));

    assert_eq!(decoded.bits, 32);
    assert!(decoded.is_signed);
}

#[test]
fn integer_and_float_with_same_bit_pattern_return_different_types() {
    let mut types = dummy_pool();

    // Same 4-byte structure image, different tags.
    let u32_type = IntegerType {
        bits: 32,
        is_signed: false,
    };
    let f32_type = FloatType { bits: 32 };

    assert_eq!(u32_type.to_bytes(), f32_type.to_bytes());

    let int_id = types.simple_type(TypeTag::Integer, &u32_type.to_bytes());
    let float_id = types.simple_type(TypeTag::Float, &f32_type.to_bytes());

    assert_ne!(int_id, float_id);
    assert_eq!(types.type_tag_from_id(int_id), TypeTag::Integer);
    assert_eq!(types.type_tag_from_id(float_id), TypeTag::Float);
}

#[test]
fn primitive_type_with_array_returns_array_type() {
    let mut types = dummy_pool();

    let s32 = IntegerType {
        bits: 32,
        is_signed: true,
    };

    let element = types.simple_type(TypeTag::Integer, &s32.to_bytes());

    let array = ArrayType {
        element_type_id: element,
        element_count: 128,
    };

    let id = types.simple_type(TypeTag::Array, &array.to_bytes());

    assert_eq!(types.type_tag_from_id(id), TypeTag::Array);

    let decoded = ArrayType::from_bytes(types.primitive_type_structure(id));

    assert_eq!(decoded.element_count, 128);
    assert_eq!(decoded.element_type_id, element);
}

#[test]
fn primitive_type_with_array_twice_returns_same_type_twice() {
    let mut types = dummy_pool();

    let s32 = IntegerType {
        bits: 32,
        is_signed: true,
    };

    let element = types.simple_type(TypeTag::Integer, &s32.to_bytes());

    let array = ArrayType {
        element_type_id: element,
        element_count: 128,
    };

    let a = types.simple_type(TypeTag::Array, &array.to_bytes());
    let b = types.simple_type(TypeTag::Array, &array.to_bytes());

    assert_eq!(a, b);
}

#[test]
fn arrays_with_different_lengths_return_different_types() {
    let mut types = dummy_pool();

    let s32 = IntegerType {
        bits: 32,
        is_signed: true,
    };

    let element = types.simple_type(TypeTag::Integer, &s32.to_bytes());

    let a = types.simple_type(
        TypeTag::Array,
        &ArrayType {
            element_type_id: element,
            element_count: 128,
        }
        .to_bytes(),
    );

    let b = types.simple_type(
        TypeTag::Array,
        &ArrayType {
            element_type_id: element,
            element_count: 42,
        }
        .to_bytes(),
    );

    assert_ne!(a, b);

    let decoded_b = ArrayType::from_bytes(types.primitive_type_structure(b));

    assert_eq!(decoded_b.element_count, 42);
}

#[test]
fn arrays_with_different_element_types_return_different_types() {
    let mut types = dummy_pool();

    let int_element = types.simple_type(
        TypeTag::Integer,
        &IntegerType {
            bits: 32,
            is_signed: true,
        }
        .to_bytes(),
    );

    let float_element = types.simple_type(TypeTag::Float, &FloatType { bits: 32 }.to_bytes());

    let a = types.simple_type(
        TypeTag::Array,
        &ArrayType {
            element_type_id: int_element,
            element_count: 128,
        }
        .to_bytes(),
    );

    let b = types.simple_type(
        TypeTag::Array,
        &ArrayType {
            element_type_id: float_element,
            element_count: 128,
        }
        .to_bytes(),
    );

    assert_ne!(a, b);
}

// --- composite builder ------------------------------------------------------

fn member(name: u32, opt_type: AstNodeId, opt_value: AstNodeId, offset: u64) -> Member {
    Member {
        name: IdentifierId::from_raw(name),
        opt_type,
        opt_value,
        is_mut: true,
        is_pub: true,
        is_global: false,
        offset_or_global_value: offset,
    }
}

#[test]
fn type_builder_with_no_members_creates_empty_type() {
    let mut types = dummy_pool();

    let builder = types.create_type_builder();
    let id = types.complete_type(builder, 3, 1, 4);

    assert_eq!(types.type_tag_from_id(id), TypeTag::Composite);

    let header = types.composite_header(id);

    assert_eq!(header.size, 3);
    assert_eq!(header.align, 1);
    assert_eq!(header.stride, 4);
    assert!(!header.is_complete);
    assert_eq!(header.member_count, 0);
    assert_eq!(types.members_of(id).count(), 0);
}

#[test]
fn type_builder_with_one_member_creates_type_with_one_member() {
    let mut types = dummy_pool();

    let m = member(5, AstNodeId::INVALID, AstNodeId::from_raw(7), 0);

    let mut builder = types.create_type_builder();

    builder.add_member(m);

    let id = types.complete_type(builder, 1, 2, 3);

    let header = types.composite_header(id);

    assert_eq!(header.size, 1);
    assert_eq!(header.align, 2);
    assert_eq!(header.stride, 3);
    assert!(!header.is_complete);
    assert_eq!(header.member_count, 1);

    let members: Vec<Member> = types.members_of(id).collect();

    assert_eq!(members, vec![m]);
}

#[test]
fn type_builder_with_two_members_creates_type_with_two_members() {
    let mut types = dummy_pool();

    let m1 = member(5, AstNodeId::INVALID, AstNodeId::from_raw(7), 0);
    let m2 = member(7, AstNodeId::from_raw(20), AstNodeId::from_raw(100), 0);

    let mut builder = types.create_type_builder();

    builder.add_member(m1);
    builder.add_member(m2);

    let id = types.complete_type(builder, 1, 2, 3);

    assert_eq!(types.composite_header(id).member_count, 2);

    let members: Vec<Member> = types.members_of(id).collect();

    assert_eq!(members, vec![m1, m2]);
}

#[test]
fn type_builder_with_20_members_creates_type_with_20_members() {
    let mut types = dummy_pool();

    let members: Vec<Member> = (0..20u32)
        .map(|i| Member {
            name: IdentifierId::from_raw(1 + i * 2),
            opt_type: if i & 2 == 0 {
                AstNodeId::INVALID
            } else {
                AstNodeId::from_raw(i + 7)
            },
            opt_value: AstNodeId::from_raw(7),
            is_mut: i == 5,
            is_pub: i == 6 || i > 16,
            is_global: i & 3 == 0,
            offset_or_global_value: u64::from(i) * 20,
        })
        .collect();

    let mut builder = types.create_type_builder();

    for &m in &members {
        builder.add_member(m);
    }

    let id = types.complete_type(builder, 1, 2, 3);

    assert_eq!(types.composite_header(id).member_count, 20);

    let stored: Vec<Member> = types.members_of(id).collect();

    assert_eq!(stored, members);
}

#[test]
fn composites_are_nominal_even_when_structurally_identical() {
    let mut types = dummy_pool();

    let m = member(5, AstNodeId::INVALID, AstNodeId::from_raw(7), 0);

    let mut builder_a = types.create_type_builder();
    builder_a.add_member(m);
    let a = types.complete_type(builder_a, 8, 4, 8);

    let mut builder_b = types.create_type_builder();
    builder_b.add_member(m);
    let b = types.complete_type(builder_b, 8, 4, 8);

    assert_ne!(a, b, "composites never share an id");
}

#[test]
fn builder_id_is_available_before_completion() {
    let mut types = dummy_pool();

    let mut builder = types.create_type_builder();
    let self_id = builder.type_id();

    assert_eq!(types.type_tag_from_id(self_id), TypeTag::TypeBuilder);

    // A self-referential member can name the type while it is being built.
    builder.add_member(member(1, AstNodeId::INVALID, AstNodeId::from_raw(9), 0));

    let id = types.complete_type(builder, 16, 8, 16);

    assert_eq!(id, self_id);
    assert_eq!(types.type_tag_from_id(id), TypeTag::Composite);
}

#[test]
fn type_names_default_to_anonymous() {
    let mut types = dummy_pool();

    let id = types.simple_type(
        TypeTag::Integer,
        &IntegerType {
            bits: 8,
            is_signed: false,
        }
        .to_bytes(),
    );

    assert!(types.type_name_from_id(id).is_invalid());

    types.set_type_name(id, IdentifierId::from_raw(3));

    assert_eq!(types.type_name_from_id(id), IdentifierId::from_raw(3));

    // First binding wins.
    types.set_type_name(id, IdentifierId::from_raw(9));

    assert_eq!(types.type_name_from_id(id), IdentifierId::from_raw(3));
}
