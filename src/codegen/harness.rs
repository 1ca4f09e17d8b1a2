//! Generated C test suite.
//!
//! For each test case: uniformly random inputs, the reference prediction
//! computed by `model::reference`, and a zeroed buffer for the generated
//! module to fill. The suite times the batch of entry-point invocations,
//! compares reference and generated outputs by L2 norm, and exits non-zero
//! when the worst error exceeds the tolerance.

use ndarray::ArrayD;
use rand::Rng;

use crate::codegen::tensor::CTensor;
use crate::error::ConvertError;
use crate::model::{reference, ModelGraph};

const TOLERANCE: &str = "1e-6";

/// Render the complete `<function_name>_test_suite.c` source.
pub fn make_test_suite(
    model: &ModelGraph,
    function_name: &str,
    num_tests: usize,
) -> Result<String, ConvertError> {
    let mut rng = rand::thread_rng();
    let num_outputs = model.outputs.len();
    let mut s = String::new();

    s.push_str("#include <stdio.h> \n#include <math.h> \n#include <sys/time.h> \n");
    s.push_str(&format!("#include \"{function_name}.h\" \n\n"));
    s.push_str("float norm2(k2c_tensor *tensor1, k2c_tensor *tensor2);\n");
    s.push_str("struct timeval GetTimeStamp(); \n \n");
    s.push_str("int main(){\n");

    for i in 1..=num_tests {
        let inputs: Vec<ArrayD<f32>> = model
            .input_shapes
            .iter()
            .map(|shape| random_tensor(&mut rng, shape))
            .collect();
        for (name, input) in model.inputs.iter().zip(&inputs) {
            CTensor::from_array(input).render(&format!("test{i}_{name}_input"), &mut s);
        }

        let outputs = reference::predict(model, &inputs).map_err(ConvertError::Reference)?;
        for (j, name) in model.outputs.iter().enumerate() {
            CTensor::from_array(&outputs[j]).render(&format!("keras_{name}_test{i}"), &mut s);
            CTensor::zeros(&model.output_shapes[j]).render(&format!("c_{name}_test{i}"), &mut s);
        }
    }

    s.push_str(&format!(" float errors[{}];\n", num_tests * num_outputs));
    s.push_str(&format!(" size_t num_tests = {num_tests}; \n"));
    s.push_str(&format!("size_t num_outputs = {num_outputs}; \n"));
    s.push_str(" struct timeval t1 = GetTimeStamp(); \n");

    for i in 1..=num_tests {
        let ins: Vec<String> = model
            .inputs
            .iter()
            .map(|n| format!("test{i}_{n}_input"))
            .collect();
        let outs: Vec<String> = model
            .outputs
            .iter()
            .map(|n| format!("c_{n}_test{i}"))
            .collect();
        s.push_str(&format!(
            "{function_name}({},\n\t{}); \n",
            ins.join(","),
            outs.join(",")
        ));
    }
    s.push('\n');

    s.push_str("struct timeval t2 = GetTimeStamp(); \n");
    s.push_str("typedef unsigned long long u64; \n");
    s.push_str("u64 t1u = t1.tv_sec*1e6 + t1.tv_usec; \n");
    s.push_str("u64 t2u = t2.tv_sec*1e6 + t2.tv_usec; \n");
    s.push_str(&format!(
        "printf(\"Average time over {num_tests} tests: %llu us \\n\", (t2u-t1u)/{num_tests}); \n"
    ));

    for i in 1..=num_tests {
        for (j, name) in model.outputs.iter().enumerate() {
            s.push_str(&format!(
                "errors[{}] = norm2(&keras_{name}_test{i},&c_{name}_test{i}); \n",
                (i - 1) * num_outputs + j
            ));
        }
    }

    s.push_str("float maxerror = errors[0]; \n");
    s.push_str("for(size_t i=1; i< num_tests*num_outputs;i++){ \n");
    s.push_str("if (errors[i] > maxerror) { \n");
    s.push_str("maxerror = errors[i];}} \n");
    s.push_str(&format!(
        "printf(\"Max L2 norm of output errors for {num_tests} tests: %f \\n\", maxerror);\n"
    ));
    s.push_str(&format!("if (maxerror > {TOLERANCE}) {{ \n"));
    s.push_str("return 1;} \n");
    s.push_str("return 0;\n} \n\n");

    s.push_str(
        "float norm2(k2c_tensor *tensor1, k2c_tensor *tensor2){ \n\
         float sum = 0; \n\
         for(size_t i=0; i<tensor1->numel; i++){\n\
         sum += (tensor1->array[i]-tensor2->array[i])*(tensor1->array[i]-tensor2->array[i]);}\n\
         return sqrt(sum);}\n\n",
    );
    s.push_str(
        "struct timeval GetTimeStamp() {\n\
         struct timeval tv;\n\
         gettimeofday(&tv,NULL);\n\
         return tv;}\n",
    );

    Ok(s)
}

fn random_tensor<R: Rng>(rng: &mut R, shape: &[usize]) -> ArrayD<f32> {
    let numel: usize = shape.iter().product();
    let data: Vec<f32> = (0..numel).map(|_| rng.gen::<f32>()).collect();
    ArrayD::from_shape_vec(shape.to_vec(), data).expect("shape matches data length")
}
