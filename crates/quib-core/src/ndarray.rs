//! n 維陣列（行優先、扁平存儲）
//!
//! 引擎把陣列視為不透明的值類型：這裡只提供定址、廣播與純重排操作，
//! 所有操作都對元素類型泛型，讓同一套重排既能作用於數值，也能作用於來源標記。

use serde::{Deserialize, Serialize};

use crate::{QuibError, Result};

/// n 維陣列
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NdArray<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T> NdArray<T> {
    /// 形狀
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// 維度數
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// 元素總數
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 扁平資料（行優先）
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    /// 以多維索引取元素
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        if index.len() != self.shape.len() || index.iter().zip(&self.shape).any(|(i, n)| i >= n) {
            return None;
        }
        self.data.get(ravel_index(index, &self.shape))
    }

    /// 逐元素映射
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> NdArray<U> {
        NdArray {
            shape: self.shape.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T: Clone> NdArray<T> {
    /// 創建陣列，資料長度必須等於形狀乘積
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(QuibError::ShapeMismatch(format!(
                "形狀 {:?} 需要 {} 個元素，實際 {} 個",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// 一維陣列
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// 零維陣列
    pub fn scalar(elem: T) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![elem],
        }
    }

    /// 以單一元素填滿指定形狀
    pub fn full(shape: &[usize], elem: T) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![elem; len],
        }
    }

    /// 改變形狀（元素順序不變）
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        Self::new(shape.to_vec(), self.data.clone())
    }

    /// 廣播到目標形狀
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Self> {
        if self.shape == shape {
            return Ok(self.clone());
        }
        let joined = broadcast_shapes(&[&self.shape, shape])?;
        if joined != shape {
            return Err(QuibError::ShapeMismatch(format!(
                "無法把 {:?} 廣播到 {:?}",
                self.shape, shape
            )));
        }
        let len: usize = shape.iter().product();
        let data = (0..len)
            .map(|flat| {
                let out = unravel_index(flat, shape);
                self.data[broadcast_source_index(&out, &self.shape)].clone()
            })
            .collect();
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// 按扁平索引收集元素，組成指定形狀
    pub fn take(&self, flat: &[usize], shape: Vec<usize>) -> Result<Self> {
        let mut data = Vec::with_capacity(flat.len());
        for &i in flat {
            let elem = self.data.get(i).ok_or(QuibError::IndexOutOfBounds {
                index: i as isize,
                len: self.data.len(),
            })?;
            data.push(elem.clone());
        }
        Self::new(shape, data)
    }

    /// 按扁平索引寫入元素
    pub fn scatter(&mut self, flat: &[usize], values: &[T]) -> Result<()> {
        if flat.len() != values.len() {
            return Err(QuibError::ShapeMismatch(format!(
                "寫入 {} 個位置但提供 {} 個值",
                flat.len(),
                values.len()
            )));
        }
        let len = self.data.len();
        for (&i, v) in flat.iter().zip(values) {
            let slot = self.data.get_mut(i).ok_or(QuibError::IndexOutOfBounds {
                index: i as isize,
                len,
            })?;
            *slot = v.clone();
        }
        Ok(())
    }

    /// 軸轉置（預設反轉所有軸）
    pub fn transpose(&self, axes: Option<&[usize]>) -> Result<Self> {
        let ndim = self.ndim();
        let axes: Vec<usize> = match axes {
            Some(axes) => axes.to_vec(),
            None => (0..ndim).rev().collect(),
        };
        let mut seen = vec![false; ndim];
        if axes.len() != ndim {
            return Err(QuibError::ShapeMismatch(format!("轉置軸 {:?} 與維度 {} 不符", axes, ndim)));
        }
        for &a in &axes {
            if a >= ndim || seen[a] {
                return Err(QuibError::ShapeMismatch(format!("無效的轉置軸 {:?}", axes)));
            }
            seen[a] = true;
        }
        let shape: Vec<usize> = axes.iter().map(|&a| self.shape[a]).collect();
        let data = (0..self.len())
            .map(|flat| {
                let out = unravel_index(flat, &shape);
                let mut src = vec![0; ndim];
                for (i, &a) in axes.iter().enumerate() {
                    src[a] = out[i];
                }
                self.data[ravel_index(&src, &self.shape)].clone()
            })
            .collect();
        Ok(Self { shape, data })
    }

    /// 沿既有軸串接
    pub fn concatenate(parts: &[NdArray<T>], axis: isize) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| QuibError::ShapeMismatch("串接至少需要一個陣列".to_string()))?;
        if first.ndim() == 0 {
            return Err(QuibError::ShapeMismatch("零維陣列無法串接".to_string()));
        }
        let axis = normalize_axis(axis, first.ndim())?;
        let mut shape = first.shape.clone();
        shape[axis] = 0;
        let mut offsets = Vec::with_capacity(parts.len());
        for part in parts {
            let compatible = part.ndim() == first.ndim()
                && part
                    .shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(d, (a, b))| d == axis || a == b);
            if !compatible {
                return Err(QuibError::ShapeMismatch(format!(
                    "串接形狀不相容: {:?} 與 {:?}",
                    part.shape, first.shape
                )));
            }
            offsets.push(shape[axis]);
            shape[axis] += part.shape[axis];
        }
        let len: usize = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        for flat in 0..len {
            let mut index = unravel_index(flat, &shape);
            let part_no = Self::owning_part(&offsets, parts, axis, index[axis]).ok_or_else(|| {
                QuibError::ShapeMismatch(format!("串接位置 {} 找不到來源", index[axis]))
            })?;
            index[axis] -= offsets[part_no];
            let part = &parts[part_no];
            data.push(part.data[ravel_index(&index, &part.shape)].clone());
        }
        Ok(Self { shape, data })
    }

    fn owning_part(offsets: &[usize], parts: &[NdArray<T>], axis: usize, coord: usize) -> Option<usize> {
        offsets
            .iter()
            .zip(parts)
            .position(|(&off, part)| coord >= off && coord < off + part.shape[axis])
    }

    /// 沿新軸堆疊
    pub fn stack(parts: &[NdArray<T>], axis: isize) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| QuibError::ShapeMismatch("堆疊至少需要一個陣列".to_string()))?;
        if parts.iter().any(|p| p.shape != first.shape) {
            return Err(QuibError::ShapeMismatch("堆疊的陣列形狀必須一致".to_string()));
        }
        let axis = normalize_axis(axis, first.ndim() + 1)?;
        let mut shape = first.shape.clone();
        shape.insert(axis, parts.len());
        let len: usize = shape.iter().product();
        let data = (0..len)
            .map(|flat| {
                let mut index = unravel_index(flat, &shape);
                let part = &parts[index.remove(axis)];
                part.data[ravel_index(&index, &part.shape)].clone()
            })
            .collect();
        Ok(Self { shape, data })
    }

    /// 重複元素（未指定軸時先攤平）
    pub fn repeat(&self, repeats: usize, axis: Option<isize>) -> Result<Self> {
        let (source, axis) = match axis {
            Some(axis) => (self.clone(), normalize_axis(axis, self.ndim())?),
            None => (self.reshape(&[self.len()])?, 0),
        };
        let mut shape = source.shape.clone();
        shape[axis] *= repeats;
        let len: usize = shape.iter().product();
        let data = (0..len)
            .map(|flat| {
                let mut index = unravel_index(flat, &shape);
                index[axis] /= repeats.max(1);
                source.data[ravel_index(&index, &source.shape)].clone()
            })
            .collect();
        Ok(Self { shape, data })
    }

    /// 反轉（未指定軸時反轉所有軸）
    pub fn flip(&self, axis: Option<isize>) -> Result<Self> {
        let axes: Vec<usize> = match axis {
            Some(axis) => vec![normalize_axis(axis, self.ndim())?],
            None => (0..self.ndim()).collect(),
        };
        let data = (0..self.len())
            .map(|flat| {
                let mut index = unravel_index(flat, &self.shape);
                for &a in &axes {
                    index[a] = self.shape[a] - 1 - index[a];
                }
                self.data[ravel_index(&index, &self.shape)].clone()
            })
            .collect();
        Ok(Self {
            shape: self.shape.clone(),
            data,
        })
    }

    /// 在前兩軸構成的平面上旋轉 90 度 k 次
    pub fn rot90(&self, k: i64) -> Result<Self> {
        if self.ndim() < 2 {
            return Err(QuibError::ShapeMismatch("rot90 需要至少二維".to_string()));
        }
        let mut axes: Vec<usize> = (0..self.ndim()).collect();
        axes.swap(0, 1);
        match k.rem_euclid(4) {
            0 => Ok(self.clone()),
            1 => self.flip(Some(1))?.transpose(Some(&axes)),
            2 => self.flip(Some(0))?.flip(Some(1)),
            _ => self.transpose(Some(&axes))?.flip(Some(1)),
        }
    }

    /// 沿多個軸歸約
    pub fn reduce_axes<U: Clone, F>(&self, axes: &[usize], keepdims: bool, init: U, mut f: F) -> NdArray<U>
    where
        F: FnMut(&U, &T) -> U,
    {
        let out_shape = reduced_shape(&self.shape, axes, keepdims);
        let kept_shape = reduced_shape(&self.shape, axes, true);
        let len: usize = out_shape.iter().product();
        let mut data = vec![init; len];
        for (flat, elem) in self.data.iter().enumerate() {
            let mut index = unravel_index(flat, &self.shape);
            for &a in axes {
                index[a] = 0;
            }
            let target = ravel_index(&index, &kept_shape);
            data[target] = f(&data[target], elem);
        }
        NdArray {
            shape: out_shape,
            data,
        }
    }

    /// 歸約的反向：把歸約後的陣列展開回原形狀
    pub fn unreduce(&self, axes: &[usize], full_shape: &[usize]) -> Result<Self> {
        let kept_shape = reduced_shape(full_shape, axes, true);
        let kept_len: usize = kept_shape.iter().product();
        if kept_len != self.len() {
            return Err(QuibError::ShapeMismatch(format!(
                "無法把 {:?} 展開到 {:?}",
                self.shape, full_shape
            )));
        }
        let len: usize = full_shape.iter().product();
        let data = (0..len)
            .map(|flat| {
                let mut index = unravel_index(flat, full_shape);
                for &a in axes {
                    index[a] = 0;
                }
                self.data[ravel_index(&index, &kept_shape)].clone()
            })
            .collect();
        Ok(Self {
            shape: full_shape.to_vec(),
            data,
        })
    }

    /// 沿指定軸的每一條「線」的扁平索引，按其餘軸的行優先順序排列
    pub fn lanes(&self, axis: usize) -> Vec<Vec<usize>> {
        let mut outer_shape = self.shape.clone();
        let lane_len = outer_shape.remove(axis);
        let outer_len: usize = outer_shape.iter().product();
        (0..outer_len)
            .map(|outer| {
                let mut index = unravel_index(outer, &outer_shape);
                index.insert(axis, 0);
                (0..lane_len)
                    .map(|i| {
                        index[axis] = i;
                        ravel_index(&index, &self.shape)
                    })
                    .collect()
            })
            .collect()
    }
}

impl NdArray<bool> {
    pub fn any(&self) -> bool {
        self.data.iter().any(|b| *b)
    }

    pub fn all(&self) -> bool {
        self.data.iter().all(|b| *b)
    }

    pub fn count_true(&self) -> usize {
        self.data.iter().filter(|b| **b).count()
    }

    /// 為 true 的扁平索引（遞增）
    pub fn true_indices(&self) -> Vec<usize> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
            .collect()
    }

    /// 由扁平索引建立遮罩
    pub fn from_indices(shape: &[usize], flat: &[usize]) -> Self {
        let mut mask = Self::full(shape, false);
        for &i in flat {
            if let Some(slot) = mask.data.get_mut(i) {
                *slot = true;
            }
        }
        mask
    }

    pub fn or(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a || b)
    }

    pub fn and(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a && b)
    }

    pub fn not(&self) -> Self {
        self.map(|b| !b)
    }

    fn zip_with(&self, other: &Self, f: impl Fn(bool, bool) -> bool) -> Result<Self> {
        if self.shape != other.shape {
            return Err(QuibError::ShapeMismatch(format!(
                "遮罩形狀不符: {:?} 與 {:?}",
                self.shape, other.shape
            )));
        }
        Ok(Self {
            shape: self.shape.clone(),
            data: self.data.iter().zip(&other.data).map(|(a, b)| f(*a, *b)).collect(),
        })
    }
}

/// 行優先步長
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// 扁平索引 → 多維索引
pub fn unravel_index(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for d in (0..shape.len()).rev() {
        let n = shape[d].max(1);
        index[d] = flat % n;
        flat /= n;
    }
    index
}

/// 多維索引 → 扁平索引
pub fn ravel_index(index: &[usize], shape: &[usize]) -> usize {
    index
        .iter()
        .zip(strides(shape))
        .map(|(i, s)| i * s)
        .sum()
}

/// 正規化（可為負的）軸號
pub fn normalize_axis(axis: isize, ndim: usize) -> Result<usize> {
    let normalized = if axis < 0 { axis + ndim as isize } else { axis };
    if normalized < 0 || normalized as usize >= ndim {
        return Err(QuibError::ShapeMismatch(format!("軸 {} 超出維度 {}", axis, ndim)));
    }
    Ok(normalized as usize)
}

/// 歸約後的形狀
pub fn reduced_shape(shape: &[usize], axes: &[usize], keepdims: bool) -> Vec<usize> {
    shape
        .iter()
        .enumerate()
        .filter_map(|(d, &n)| match (axes.contains(&d), keepdims) {
            (true, true) => Some(1),
            (true, false) => None,
            (false, _) => Some(n),
        })
        .collect()
}

/// 多個形狀的廣播結果
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1; ndim];
    for shape in shapes {
        let offset = ndim - shape.len();
        for (d, &n) in shape.iter().enumerate() {
            let slot = &mut out[offset + d];
            if *slot == 1 {
                *slot = n;
            } else if n != 1 && n != *slot {
                return Err(QuibError::ShapeMismatch(format!(
                    "形狀無法廣播: {:?}",
                    shapes
                )));
            }
        }
    }
    Ok(out)
}

/// 反廣播：輸出的多維索引對應到來源的扁平索引（被廣播的維度對應到 0）
pub fn broadcast_source_index(out_index: &[usize], src_shape: &[usize]) -> usize {
    let offset = out_index.len() - src_shape.len();
    let src: Vec<usize> = src_shape
        .iter()
        .enumerate()
        .map(|(d, &n)| if n == 1 { 0 } else { out_index[offset + d] })
        .collect();
    ravel_index(&src, src_shape)
}
