use kasm::jvm::code::{Code, Instruction, Label, TryCatchBlock};
use kasm::jvm::model::{ClassModel, Field, Method};
use kasm::jvm::{
    ConstantValue, Error, FieldAccessFlags, Handle, HandleKind, LiteralType, MethodAccessFlags,
    Opcode,
};
use pretty_assertions::assert_eq;

fn place(code: &mut Code, label: Label) {
    let _ = code.append(Instruction::Label(label));
}

fn line(code: &mut Code, line: u16) {
    let start = code.new_label();
    place(code, start);
    let _ = code.append(Instruction::LineNumber { line, start });
}

fn simple(code: &mut Code, opcode: Opcode) {
    let _ = code.append(Instruction::Simple(opcode));
}

/// `static int pick(int)`: a table switch, a lookup switch with unsorted keys, a loop, and a
/// try/catch
fn pick_method() -> Method {
    let mut method = Method::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "pick",
        "(I)I",
    );
    method.exceptions.push(String::from("java/io/IOException"));
    let code = &mut method.code;

    let one = code.new_label();
    let two = code.new_label();
    let other = code.new_label();
    let lookup = code.new_label();
    let seven = code.new_label();
    let loop_head = code.new_label();
    let loop_end = code.new_label();
    let try_start = code.new_label();
    let try_end = code.new_label();
    let handler = code.new_label();

    line(code, 10);
    let _ = code.append(Instruction::LocalVar {
        opcode: Opcode::ILOAD,
        slot: 0,
    });
    let _ = code.append(Instruction::TableSwitch {
        min: 1,
        max: 2,
        default: lookup,
        targets: vec![one, two],
    });

    place(code, one);
    line(code, 11);
    simple(code, Opcode::ICONST_1);
    simple(code, Opcode::IRETURN);

    place(code, two);
    let _ = code.append(Instruction::Int {
        opcode: Opcode::SIPUSH,
        operand: -1234,
    });
    simple(code, Opcode::IRETURN);

    place(code, lookup);
    let _ = code.append(Instruction::LocalVar {
        opcode: Opcode::ILOAD,
        slot: 0,
    });
    let _ = code.append(Instruction::LookupSwitch {
        default: other,
        keys: vec![100, -5, 7],
        targets: vec![one, two, seven],
    });

    place(code, seven);
    let _ = code.append(Instruction::Int {
        opcode: Opcode::BIPUSH,
        operand: 7,
    });
    let _ = code.append(Instruction::LocalVar {
        opcode: Opcode::ISTORE,
        slot: 1,
    });
    place(code, loop_head);
    let _ = code.append(Instruction::LocalVar {
        opcode: Opcode::ILOAD,
        slot: 1,
    });
    let _ = code.append(Instruction::Jump {
        opcode: Opcode::IFLE,
        target: loop_end,
    });
    let _ = code.append(Instruction::Increment { slot: 1, delta: -1 });
    let _ = code.append(Instruction::Jump {
        opcode: Opcode::GOTO,
        target: loop_head,
    });
    place(code, loop_end);
    let _ = code.append(Instruction::LocalVar {
        opcode: Opcode::ILOAD,
        slot: 1,
    });
    simple(code, Opcode::IRETURN);

    place(code, other);
    place(code, try_start);
    let _ = code.append(Instruction::Ldc(ConstantValue::String(String::from(
        "unexpected",
    ))));
    let _ = code.append(Instruction::Method {
        opcode: Opcode::INVOKESTATIC,
        owner: String::from("pkg/Sample"),
        name: String::from("fail"),
        descriptor: String::from("(Ljava/lang/String;)I"),
        is_interface: false,
    });
    simple(code, Opcode::IRETURN);
    place(code, try_end);
    place(code, handler);
    let _ = code.append(Instruction::LocalVar {
        opcode: Opcode::ASTORE,
        slot: 2,
    });
    simple(code, Opcode::ICONST_M1);
    simple(code, Opcode::IRETURN);

    code.add_try_catch_block(TryCatchBlock {
        start: try_start,
        end: try_end,
        handler,
        exception: Some(String::from("java/lang/IllegalStateException")),
    });
    code.add_try_catch_block(TryCatchBlock {
        start: try_start,
        end: try_end,
        handler,
        exception: None,
    });
    code.max_stack = 2;
    code.max_locals = 3;
    method
}

/// `Runnable lambda()`: invokedynamic, wide loads and constants of every shape
fn constants_method() -> Method {
    let mut method = Method::new(MethodAccessFlags::PUBLIC, "constants", "()Ljava/lang/Runnable;");
    let code = &mut method.code;

    for value in [
        ConstantValue::Integer(123_456),
        ConstantValue::Float(1.5),
        ConstantValue::Long(-9_000_000_000),
        ConstantValue::Double(2.25),
        ConstantValue::Class(String::from("java/util/List")),
        ConstantValue::MethodType(String::from("(I)V")),
    ] {
        let wide = value.is_wide();
        let _ = code.append(Instruction::Ldc(value));
        simple(code, if wide { Opcode::POP2 } else { Opcode::POP });
    }

    let _ = code.append(Instruction::LocalVar {
        opcode: Opcode::DLOAD,
        slot: 300,
    });
    simple(code, Opcode::POP2);
    let _ = code.append(Instruction::Increment {
        slot: 2,
        delta: 1000,
    });
    let _ = code.append(Instruction::Type {
        opcode: Opcode::NEW,
        descriptor: String::from("java/lang/Object"),
    });
    simple(code, Opcode::DUP);
    let _ = code.append(Instruction::Method {
        opcode: Opcode::INVOKESPECIAL,
        owner: String::from("java/lang/Object"),
        name: String::from("<init>"),
        descriptor: String::from("()V"),
        is_interface: false,
    });
    simple(code, Opcode::POP);
    let _ = code.append(Instruction::Int {
        opcode: Opcode::BIPUSH,
        operand: 3,
    });
    let _ = code.append(Instruction::Int {
        opcode: Opcode::BIPUSH,
        operand: 4,
    });
    let _ = code.append(Instruction::MultiANewArray {
        descriptor: String::from("[[I"),
        dimensions: 2,
    });
    let _ = code.append(Instruction::Field {
        opcode: Opcode::PUTSTATIC,
        owner: String::from("pkg/Sample"),
        name: String::from("grid"),
        descriptor: String::from("[[I"),
    });
    let _ = code.append(Instruction::LocalVar {
        opcode: Opcode::ALOAD,
        slot: 0,
    });
    let _ = code.append(Instruction::Method {
        opcode: Opcode::INVOKEINTERFACE,
        owner: String::from("java/util/List"),
        name: String::from("size"),
        descriptor: String::from("()I"),
        is_interface: true,
    });
    simple(code, Opcode::POP);

    let metafactory = Handle {
        kind: HandleKind::InvokeStatic,
        owner: String::from("java/lang/invoke/LambdaMetafactory"),
        name: String::from("metafactory"),
        descriptor: String::from(
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
        ),
        is_interface: false,
    };
    let body = Handle {
        kind: HandleKind::InvokeStatic,
        owner: String::from("pkg/Sample"),
        name: String::from("lambda$0"),
        descriptor: String::from("()V"),
        is_interface: false,
    };
    let _ = code.append(Instruction::InvokeDynamic {
        name: String::from("run"),
        descriptor: String::from("()Ljava/lang/Runnable;"),
        bootstrap: metafactory,
        arguments: vec![
            ConstantValue::MethodType(String::from("()V")),
            ConstantValue::MethodHandle(body),
            ConstantValue::MethodType(String::from("()V")),
        ],
    });
    simple(code, Opcode::ARETURN);
    code.max_stack = 4;
    code.max_locals = 302;
    method
}

fn sample_class() -> ClassModel {
    let mut class = ClassModel::new("pkg/Sample", Some("java/lang/Object"));
    class.interfaces.push(String::from("java/lang/Runnable"));
    class.source_file = Some(String::from("Sample.java"));

    let mut answer = Field::new(
        FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
        "ANSWER",
        "I",
    );
    answer.value = Some(ConstantValue::Integer(42));
    class.add_field(answer);
    let mut greeting = Field::new(
        FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
        "GREETING",
        "Ljava/lang/String;",
    );
    greeting.value = Some(ConstantValue::String(String::from("h\u{e9}llo \u{0} w\u{1F600}rld")));
    class.add_field(greeting);
    class.add_field(Field::new(FieldAccessFlags::STATIC, "grid", "[[I"));

    class.add_method(pick_method());
    class.add_method(constants_method());
    class.add_method(Method::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        "run",
        "()V",
    ));
    class
}

/// Instructions, skipping labels and line numbers
fn real_instructions(code: &Code) -> Vec<&Instruction> {
    code.iter()
        .map(|(_, insn)| insn)
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

#[test]
fn re_encoding_is_byte_identical() {
    let first = sample_class().to_bytes().unwrap();
    let decoded = ClassModel::from_bytes(&first).unwrap();
    let second = decoded.to_bytes().unwrap();
    assert_eq!(first, second);

    let third = ClassModel::from_bytes(&second).unwrap().to_bytes().unwrap();
    assert_eq!(second, third);
}

#[test]
fn decoding_recovers_the_structure() {
    let original = sample_class();
    let decoded = ClassModel::from_bytes(&original.to_bytes().unwrap()).unwrap();

    assert_eq!(decoded.name, "pkg/Sample");
    assert_eq!(decoded.super_name.as_deref(), Some("java/lang/Object"));
    assert_eq!(decoded.interfaces, vec!["java/lang/Runnable"]);
    assert_eq!(decoded.source_file.as_deref(), Some("Sample.java"));
    assert_eq!(decoded.fields, original.fields);
    assert_eq!(decoded.access_flags, original.access_flags);
    assert_eq!(decoded.version, original.version);

    let method_names: Vec<&str> = decoded.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(method_names, vec!["pick", "constants", "run"]);

    for method in &original.methods {
        let found = decoded
            .find_method(&method.name, &method.descriptor)
            .unwrap();
        assert_eq!(found.access_flags, method.access_flags);
        assert_eq!(found.exceptions, method.exceptions);
        assert_eq!(found.code.max_stack, method.code.max_stack);
        assert_eq!(found.code.max_locals, method.code.max_locals);
        assert_eq!(
            real_instructions(&found.code).len(),
            real_instructions(&method.code).len()
        );
    }

    let run = decoded.find_method("run", "()V").unwrap();
    assert!(run.code.is_empty());
    assert!(!run.has_code());
}

#[test]
fn operands_survive_decoding() {
    let original = sample_class();
    let decoded = ClassModel::from_bytes(&original.to_bytes().unwrap()).unwrap();

    // Label-free instructions compare directly
    for (name, descriptor) in [("pick", "(I)I"), ("constants", "()Ljava/lang/Runnable;")] {
        let before = real_instructions(&original.find_method(name, descriptor).unwrap().code)
            .into_iter()
            .filter(|insn| insn.labels().is_empty())
            .cloned()
            .collect::<Vec<_>>();
        let after = real_instructions(&decoded.find_method(name, descriptor).unwrap().code)
            .into_iter()
            .filter(|insn| insn.labels().is_empty())
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    let ldc_types: Vec<LiteralType> = decoded
        .find_method("constants", "()Ljava/lang/Runnable;")
        .unwrap()
        .code
        .iter()
        .filter_map(|(_, insn)| match insn {
            Instruction::Ldc(value) => Some(value.literal_type()),
            _ => None,
        })
        .collect();
    assert_eq!(
        ldc_types,
        vec![
            LiteralType::Int,
            LiteralType::Float,
            LiteralType::Long,
            LiteralType::Double,
            LiteralType::Class,
            LiteralType::MethodType,
        ]
    );
}

#[test]
fn switches_keep_their_shape() {
    let decoded = ClassModel::from_bytes(&sample_class().to_bytes().unwrap()).unwrap();
    let code = &decoded.find_method("pick", "(I)I").unwrap().code;

    let mut saw_table = false;
    let mut saw_lookup = false;
    for (_, insn) in code {
        match insn {
            Instruction::TableSwitch {
                min,
                max,
                default,
                targets,
            } => {
                saw_table = true;
                assert_eq!((*min, *max), (1, 2));
                assert_eq!(targets.len(), 2);
                assert_eq!(
                    target_of(code, targets[0]),
                    Some(&Instruction::Simple(Opcode::ICONST_1))
                );
                assert_eq!(
                    target_of(code, *default),
                    Some(&Instruction::LocalVar {
                        opcode: Opcode::ILOAD,
                        slot: 0
                    })
                );
            }
            Instruction::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                saw_lookup = true;
                assert_eq!(keys, &vec![100, -5, 7]);
                assert_eq!(keys.len(), targets.len());
                assert_eq!(
                    target_of(code, targets[2]),
                    Some(&Instruction::Int {
                        opcode: Opcode::BIPUSH,
                        operand: 7
                    })
                );
                assert_eq!(
                    target_of(code, *default),
                    Some(&Instruction::Ldc(ConstantValue::String(String::from(
                        "unexpected"
                    ))))
                );
            }
            _ => (),
        }
    }
    assert!(saw_table && saw_lookup);
}

#[test]
fn exception_table_and_lines_keep_their_order() {
    let decoded = ClassModel::from_bytes(&sample_class().to_bytes().unwrap()).unwrap();
    let code = &decoded.find_method("pick", "(I)I").unwrap().code;

    let exceptions: Vec<Option<&str>> = code
        .try_catch_blocks()
        .iter()
        .map(|block| block.exception.as_deref())
        .collect();
    assert_eq!(
        exceptions,
        vec![Some("java/lang/IllegalStateException"), None]
    );
    let block = &code.try_catch_blocks()[0];
    assert_eq!(
        target_of(code, block.handler),
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
    assert_eq!(lines, vec![10, 11]);
}

#[test]
fn compact_encodings_are_chosen() {
    let mut class = ClassModel::new("pkg/Forms", Some("java/lang/Object"));
    let mut method = Method::new(MethodAccessFlags::STATIC, "forms", "()V");
    let code = &mut method.code;
    let skip = code.new_label();
    for slot in [1, 200, 300] {
        let _ = code.append(Instruction::LocalVar {
            opcode: Opcode::ILOAD,
            slot,
        });
    }
    let _ = code.append(Instruction::Increment { slot: 1, delta: 1 });
    let _ = code.append(Instruction::Increment {
        slot: 1,
        delta: 1000,
    });
    let _ = code.append(Instruction::Jump {
        opcode: Opcode::GOTO,
        target: skip,
    });
    simple(code, Opcode::NOP);
    place(code, skip);
    simple(code, Opcode::RETURN);
    class.add_method(method);

    let bytes = class.to_bytes().unwrap();
    let expected: &[u8] = &[
        0x1B, // iload_1
        0x15, 200, // iload 200
        0xC4, 0x15, 0x01, 0x2C, // wide iload 300
        0x84, 0x01, 0x01, // iinc 1 1
        0xC4, 0x84, 0x00, 0x01, 0x03, 0xE8, // wide iinc 1 1000
        0xA7, 0x00, 0x04, // goto +4
        0x00, // nop
        0xB1, // return
    ];
    assert!(bytes.windows(expected.len()).any(|window| window == expected));
}

#[test]
fn unplaced_labels_fail_encoding() {
    let mut class = ClassModel::new("pkg/Broken", Some("java/lang/Object"));
    let mut method = Method::new(MethodAccessFlags::STATIC, "broken", "()V");
    let nowhere = method.code.new_label();
    let _ = method.code.append(Instruction::Jump {
        opcode: Opcode::GOTO,
        target: nowhere,
    });
    class.add_method(method);

    match class.to_bytes() {
        Err(Error::MalformedInput(msg)) => {
            assert!(msg.contains("broken()V"), "{}", msg);
            assert!(msg.contains("never placed"), "{}", msg);
        }
        other => panic!("expected malformed input, got {:?}", other),
    }
}

/// Swap the bytecode of the only method body for an equivalent spelling
fn respell(bytes: &[u8], compact: &[u8], long: &[u8]) -> Vec<u8> {
    let mut pattern = (compact.len() as u32).to_be_bytes().to_vec();
    pattern.extend_from_slice(compact);
    let at = bytes
        .windows(pattern.len())
        .position(|window| window == pattern.as_slice())
        .unwrap();

    // `attribute_length`, `max_stack` and `max_locals` sit right before `code_length`
    let attribute_length =
        u32::from_be_bytes([bytes[at - 8], bytes[at - 7], bytes[at - 6], bytes[at - 5]]);
    let grown = attribute_length + long.len() as u32 - compact.len() as u32;

    let mut out = bytes[..at - 8].to_vec();
    out.extend_from_slice(&grown.to_be_bytes());
    out.extend_from_slice(&bytes[at - 4..at]);
    out.extend_from_slice(&(long.len() as u32).to_be_bytes());
    out.extend_from_slice(long);
    out.extend_from_slice(&bytes[at + pattern.len()..]);
    out
}

fn single_method_class(method: Method) -> ClassModel {
    let mut class = ClassModel::new("pkg/Spelled", Some("java/lang/Object"));
    class.add_method(method);
    class
}

#[test]
fn longer_encodings_decode_to_the_same_instructions() {
    let mut method = Method::new(MethodAccessFlags::STATIC, "bump", "()I");
    let _ = method.code.append(Instruction::Increment { slot: 1, delta: 1 });
    let _ = method.code.append(Instruction::LocalVar {
        opcode: Opcode::ILOAD,
        slot: 1,
    });
    simple(&mut method.code, Opcode::IRETURN);
    method.code.max_stack = 1;
    method.code.max_locals = 2;
    let class = single_method_class(method);
    let bytes = class.to_bytes().unwrap();
    let expected = real_instructions(&class.methods[0].code)
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();

    let compact: &[u8] = &[0x84, 0x01, 0x01, 0x1B, 0xAC];
    let spellings: [&[u8]; 2] = [
        // iinc 1 1, iload 1
        &[0x84, 0x01, 0x01, 0x15, 0x01, 0xAC],
        // wide iinc 1 1, wide iload 1
        &[0xC4, 0x84, 0x00, 0x01, 0x00, 0x01, 0xC4, 0x15, 0x00, 0x01, 0xAC],
    ];
    for long in spellings {
        let decoded = ClassModel::from_bytes(&respell(&bytes, compact, long)).unwrap();
        let found = real_instructions(&decoded.methods[0].code)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(found, expected);
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }
}

#[test]
fn ldc_w_with_a_small_index_is_still_ldc() {
    let mut method = Method::new(MethodAccessFlags::STATIC, "text", "()Ljava/lang/Object;");
    let _ = method
        .code
        .append(Instruction::Ldc(ConstantValue::String(String::from("spelled"))));
    simple(&mut method.code, Opcode::ARETURN);
    method.code.max_stack = 1;
    let bytes = single_method_class(method).to_bytes().unwrap();

    // code_length 3: ldc <index>, areturn
    let at = bytes
        .windows(7)
        .position(|window| window[..5] == [0, 0, 0, 3, 0x12] && window[6] == 0xB0)
        .unwrap();
    let index = bytes[at + 5];
    let respelled = respell(&bytes, &[0x12, index, 0xB0], &[0x13, 0x00, index, 0xB0]);

    let decoded = ClassModel::from_bytes(&respelled).unwrap();
    assert_eq!(
        real_instructions(&decoded.methods[0].code),
        vec![
            &Instruction::Ldc(ConstantValue::String(String::from("spelled"))),
            &Instruction::Simple(Opcode::ARETURN),
        ]
    );
    assert_eq!(decoded.to_bytes().unwrap(), bytes);
}

#[test]
fn oversized_exception_tables_fail_encoding() {
    let mut class = ClassModel::new("pkg/Handlers", Some("java/lang/Object"));
    let mut method = Method::new(MethodAccessFlags::STATIC, "guarded", "()V");
    let code = &mut method.code;
    let start = code.new_label();
    let end = code.new_label();
    let handler = code.new_label();
    place(code, start);
    simple(code, Opcode::RETURN);
    place(code, end);
    place(code, handler);
    simple(code, Opcode::ATHROW);
    for _ in 0..=u16::MAX as usize + 1 {
        code.add_try_catch_block(TryCatchBlock {
            start,
            end,
            handler,
            exception: None,
        });
    }
    class.add_method(method);

    match class.to_bytes() {
        Err(Error::MalformedInput(msg)) => assert!(msg.contains("65537 entries"), "{}", msg),
        other => panic!("expected malformed input, got {:?}", other.map(|bytes| bytes.len())),
    }
}

#[test]
fn truncated_bytes_are_malformed() {
    let bytes = sample_class().to_bytes().unwrap();
    for len in [0, 3, 9, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            matches!(
                ClassModel::from_bytes(&bytes[..len]),
                Err(Error::MalformedInput(_))
            ),
            "prefix of length {}",
            len
        );
    }
}
