//! Decoding classes produced by `javac` rather than by this crate
//!
//! `fixtures/Shapes.class` is `fixtures/Shapes.java` compiled with `javac --release 11 -g`, so it
//! carries the attributes the model skips (stack maps, local variable tables, signatures, inner
//! classes, nest members) next to the ones it keeps.

use kasm::jvm::class_file::Version;
use kasm::jvm::code::{Code, Instruction, Label};
use kasm::jvm::model::{ClassModel, Method};
use kasm::jvm::{ClassAccessFlags, ConstantValue, Handle, HandleKind, Opcode};
use pretty_assertions::assert_eq;

const SHAPES: &[u8] = include_bytes!("fixtures/Shapes.class");

fn shapes() -> ClassModel {
    ClassModel::from_bytes(SHAPES).unwrap()
}

fn method<'a>(class: &'a ClassModel, name: &str) -> &'a Method {
    class
        .methods
        .iter()
        .find(|method| method.name == name)
        .unwrap()
}

fn instructions(code: &Code) -> Vec<Instruction> {
    code.iter().map(|(_, insn)| insn.clone()).collect()
}

fn real_instructions(code: &Code) -> Vec<Instruction> {
    instructions(code)
        .into_iter()
        .filter(|insn| !insn.is_pseudo())
        .collect()
}

/// First real instruction after the marker of `label`
fn target_of(code: &Code, label: Label) -> Option<&Instruction> {
    let mut cursor = code.marker_of(label)?;
    loop {
        cursor = code.next(cursor).ok()??;
        let insn = code.instruction(cursor).ok()?;
        if !insn.is_pseudo() {
            return Some(insn);
        }
    }
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_bytes())
}

fn invoke_dynamic(code: &Code) -> (String, String, Handle, Vec<ConstantValue>) {
    code.iter()
        .find_map(|(_, insn)| match insn {
            Instruction::InvokeDynamic {
                name,
                descriptor,
                bootstrap,
                arguments,
            } => Some((
                name.clone(),
                descriptor.clone(),
                bootstrap.clone(),
                arguments.clone(),
            )),
            _ => None,
        })
        .unwrap()
}

#[test]
fn header_and_members() {
    let class = shapes();
    assert_eq!(class.version, Version::JAVA11);
    assert_eq!(
        class.access_flags,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER
    );
    assert_eq!(class.name, "Shapes");
    assert_eq!(class.super_name.as_deref(), Some("java/lang/Object"));
    assert!(class.interfaces.is_empty());
    assert_eq!(class.source_file.as_deref(), Some("Shapes.java"));

    let fields: Vec<(&str, Option<&ConstantValue>)> = class
        .fields
        .iter()
        .map(|field| (field.name.as_str(), field.value.as_ref()))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("BIG", Some(&ConstantValue::Long(9_000_000_000))),
            ("RATIO", Some(&ConstantValue::Double(0.618))),
            ("items", None),
        ]
    );

    let methods: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        methods,
        vec![
            "<init>",
            "add",
            "dense",
            "sparse",
            "named",
            "mix",
            "guarded",
            "sum",
            "doubled",
            "describe",
            "lambda$describe$1",
            "lambda$doubled$0",
        ]
    );
}

#[test]
fn switches_keep_their_targets() {
    let class = shapes();

    let dense = &method(&class, "dense").code;
    match &real_instructions(dense)[1] {
        Instruction::TableSwitch {
            min,
            max,
            default,
            targets,
        } => {
            assert_eq!((*min, *max), (1, 4));
            assert_eq!(targets.len(), 4);
            assert_eq!(
                target_of(dense, targets[0]),
                Some(&Instruction::Int {
                    opcode: Opcode::BIPUSH,
                    operand: 10
                })
            );
            assert_eq!(
                target_of(dense, targets[3]),
                Some(&Instruction::Int {
                    opcode: Opcode::BIPUSH,
                    operand: 40
                })
            );
            assert_eq!(
                target_of(dense, *default),
                Some(&Instruction::Simple(Opcode::ICONST_M1))
            );
        }
        other => panic!("expected a table switch, got {:?}", other),
    }

    let sparse = &method(&class, "sparse").code;
    match &real_instructions(sparse)[1] {
        Instruction::LookupSwitch {
            default,
            keys,
            targets,
        } => {
            assert_eq!(keys, &vec![-100, 7, 100_000]);
            assert_eq!(
                target_of(sparse, targets[2]),
                Some(&Instruction::Simple(Opcode::ICONST_3))
            );
            assert_eq!(
                target_of(sparse, *default),
                Some(&Instruction::Simple(Opcode::ICONST_0))
            );
        }
        other => panic!("expected a lookup switch, got {:?}", other),
    }

    // A string switch is a lookup on hash codes, then a second lookup on the case index
    let named: Vec<Vec<i32>> = method(&class, "named")
        .code
        .iter()
        .filter_map(|(_, insn)| match insn {
            Instruction::LookupSwitch { keys, .. } => Some(keys.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(named, vec![vec![110_182, 115_276], vec![0, 1]]);
}

#[test]
fn wide_constants_and_locals() {
    let class = shapes();
    let local = |opcode, slot| Instruction::LocalVar { opcode, slot };
    assert_eq!(
        real_instructions(&method(&class, "mix").code),
        vec![
            local(Opcode::LLOAD, 0),
            Instruction::Ldc(ConstantValue::Long(31_000_000_007)),
            Instruction::Simple(Opcode::LMUL),
            local(Opcode::LSTORE, 4),
            local(Opcode::DLOAD, 2),
            Instruction::Ldc(ConstantValue::Double(2.5e10)),
            Instruction::Simple(Opcode::DMUL),
            local(Opcode::DSTORE, 6),
            local(Opcode::LLOAD, 4),
            local(Opcode::DLOAD, 6),
            Instruction::Simple(Opcode::D2L),
            Instruction::Simple(Opcode::LADD),
            Instruction::Ldc(ConstantValue::Long(9_000_000_000)),
            Instruction::Simple(Opcode::LADD),
            Instruction::Simple(Opcode::LRETURN),
        ]
    );

    let sum = &method(&class, "sum").code;
    assert!(real_instructions(sum).contains(&Instruction::Increment { slot: 4, delta: 1 }));
    for (_, insn) in sum {
        match insn {
            Instruction::Jump {
                opcode: Opcode::IF_ICMPGE,
                target,
            } => assert_eq!(target_of(sum, *target), Some(&local(Opcode::ILOAD, 1))),
            Instruction::Jump {
                opcode: Opcode::GOTO,
                target,
            } => assert_eq!(target_of(sum, *target), Some(&local(Opcode::ILOAD, 4))),
            Instruction::Jump { opcode, .. } => panic!("unexpected jump {:?}", opcode),
            _ => (),
        }
    }
}

#[test]
fn try_finally_and_line_numbers() {
    let class = shapes();
    let code = &method(&class, "guarded").code;

    let blocks = code.try_catch_blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].exception, None);
    let aload_0 = Instruction::LocalVar {
        opcode: Opcode::ALOAD,
        slot: 0,
    };
    assert_eq!(target_of(code, blocks[0].start), Some(&aload_0));
    assert_eq!(target_of(code, blocks[0].end), Some(&aload_0));
    assert_eq!(
        target_of(code, blocks[0].handler),
        Some(&Instruction::LocalVar {
            opcode: Opcode::ASTORE,
            slot: 2
        })
    );

    let lines: Vec<u16> = code
        .iter()
        .filter_map(|(_, insn)| match insn {
            Instruction::LineNumber { line, .. } => Some(*line),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec![58, 59, 61, 59, 61, 62]);

    let (name, descriptor, bootstrap, arguments) = invoke_dynamic(code);
    assert_eq!(name, "makeConcatWithConstants");
    assert_eq!(descriptor, "(I)Ljava/lang/String;");
    assert_eq!(bootstrap.owner, "java/lang/invoke/StringConcatFactory");
    assert_eq!(
        arguments,
        vec![ConstantValue::String(String::from("ok \u{1}"))]
    );
}

#[test]
fn lambdas_keep_their_bootstrap_arguments() {
    let class = shapes();

    let (name, descriptor, bootstrap, arguments) = invoke_dynamic(&method(&class, "doubled").code);
    assert_eq!(name, "getAsInt");
    assert_eq!(descriptor, "(I)Ljava/util/function/IntSupplier;");
    assert_eq!(bootstrap.kind, HandleKind::InvokeStatic);
    assert_eq!(bootstrap.owner, "java/lang/invoke/LambdaMetafactory");
    assert_eq!(bootstrap.name, "metafactory");
    assert_eq!(
        arguments,
        vec![
            ConstantValue::MethodType(String::from("()I")),
            ConstantValue::MethodHandle(Handle {
                kind: HandleKind::InvokeStatic,
                owner: String::from("Shapes"),
                name: String::from("lambda$doubled$0"),
                descriptor: String::from("(I)I"),
                is_interface: false,
            }),
            ConstantValue::MethodType(String::from("()I")),
        ]
    );

    let (_, _, _, arguments) = invoke_dynamic(&method(&class, "describe").code);
    match &arguments[1] {
        ConstantValue::MethodHandle(handle) => {
            assert_eq!(handle.kind, HandleKind::InvokeSpecial);
            assert_eq!(handle.name, "lambda$describe$1");
        }
        other => panic!("expected a method handle, got {:?}", other),
    }
}

#[test]
fn re_encoding_keeps_the_structure() {
    let first = shapes();
    let bytes = first.to_bytes().unwrap();
    let second = ClassModel::from_bytes(&bytes).unwrap();

    assert_eq!(second.version, first.version);
    assert_eq!(second.access_flags, first.access_flags);
    assert_eq!(second.name, first.name);
    assert_eq!(second.super_name, first.super_name);
    assert_eq!(second.source_file, first.source_file);
    assert_eq!(second.fields, first.fields);
    assert_eq!(second.methods.len(), first.methods.len());
    for (before, after) in first.methods.iter().zip(&second.methods) {
        assert_eq!(after.name, before.name);
        assert_eq!(after.descriptor, before.descriptor);
        assert_eq!(after.access_flags, before.access_flags);
        assert_eq!(after.code.max_stack, before.code.max_stack);
        assert_eq!(after.code.max_locals, before.code.max_locals);
        assert_eq!(instructions(&after.code), instructions(&before.code));
        assert_eq!(after.code.try_catch_blocks(), before.code.try_catch_blocks());
    }

    assert_eq!(second.to_bytes().unwrap(), bytes);
}

#[test]
fn skipped_attributes_are_dropped() {
    let bytes = shapes().to_bytes().unwrap();
    for skipped in [
        "StackMapTable",
        "LocalVariableTable",
        "LocalVariableTypeTable",
        "Signature",
        "InnerClasses",
        "NestMembers",
    ] {
        assert!(contains(SHAPES, skipped), "{}", skipped);
        assert!(!contains(&bytes, skipped), "{}", skipped);
    }
    for kept in [
        "Code",
        "ConstantValue",
        "LineNumberTable",
        "SourceFile",
        "BootstrapMethods",
    ] {
        assert!(contains(&bytes, kept), "{}", kept);
    }
}
